use crate::{device::Device, is_depth_stencil_format, Result, vk};
use std::ptr;
use tracing::warn;

/// The shape of one render pass attachment, independent of the image that
/// backs it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub format: vk::Format,
    pub sample_count: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub initial_layout: vk::ImageLayout,
}

impl Default for Attachment {
    fn default() -> Self {
        Attachment {
            format: vk::Format::UNDEFINED,
            sample_count: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::empty(),
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

/// Load and store operation for a render pass attachment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LoadStoreOp {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
}

impl Default for LoadStoreOp {
    fn default() -> Self {
        LoadStoreOp {
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
        }
    }
}

/// The attachments one subpass consumes and produces, by index into the
/// render target's attachment list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubpassInfo {
    pub input_attachments: Vec<u32>,
    pub output_attachments: Vec<u32>,
    pub enable_depth_stencil: bool,
}

impl Default for SubpassInfo {
    fn default() -> Self {
        SubpassInfo {
            input_attachments: vec![],
            output_attachments: vec![0],
            enable_depth_stencil: true,
        }
    }
}

struct SubpassRefs {
    input: Vec<vk::AttachmentReference>,
    color: Vec<vk::AttachmentReference>,
    depth: Option<vk::AttachmentReference>,
}

fn attachment_descriptions(attachments: &[Attachment], load_store_ops: &[LoadStoreOp]) -> Vec<vk::AttachmentDescription> {
    attachments
        .iter()
        .enumerate()
        .map(|(i, attachment)| {
            let final_layout = if is_depth_stencil_format(attachment.format) {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            };
            let ops = load_store_ops.get(i).copied().unwrap_or_default();
            vk::AttachmentDescription {
                format: attachment.format,
                samples: attachment.sample_count,
                initial_layout: attachment.initial_layout,
                final_layout,
                load_op: ops.load_op,
                store_op: ops.store_op,
                ..Default::default()
            }
        })
        .collect()
}

fn reference(attachment: u32, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference { attachment, layout }
}

fn subpass_references(subpasses: &[SubpassInfo], attachments: &[Attachment]) -> Vec<SubpassRefs> {
    subpasses
        .iter()
        .map(|subpass| {
            let mut refs = SubpassRefs {
                input: vec![],
                color: vec![],
                depth: None,
            };

            for &output in &subpass.output_attachments {
                let Some(attachment) = attachments.get(output as usize) else {
                    warn!("output attachment {output} is out of range, skipping");
                    continue;
                };
                let layout = if attachment.initial_layout == vk::ImageLayout::UNDEFINED {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                } else {
                    attachment.initial_layout
                };
                refs.color.push(reference(output, layout));
            }

            for &input in &subpass.input_attachments {
                let Some(attachment) = attachments.get(input as usize) else {
                    warn!("input attachment {input} is out of range, skipping");
                    continue;
                };
                let default_layout = if is_depth_stencil_format(attachment.format) {
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                let layout = if attachment.initial_layout == vk::ImageLayout::UNDEFINED {
                    default_layout
                } else {
                    attachment.initial_layout
                };
                refs.input.push(reference(input, layout));
            }

            if subpass.enable_depth_stencil {
                if let Some((index, attachment)) = attachments
                    .iter()
                    .enumerate()
                    .find(|(_, a)| is_depth_stencil_format(a.format))
                {
                    let layout = if attachment.initial_layout == vk::ImageLayout::UNDEFINED {
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                    } else {
                        attachment.initial_layout
                    };
                    refs.depth = Some(reference(index as u32, layout));
                }
            }

            refs
        })
        .collect()
}

/// Makes every attachment's initial layout match its first use, and its
/// final layout match its use in the last subpass.
fn resolve_attachment_layouts(refs: &mut [SubpassRefs], descriptions: &mut [vk::AttachmentDescription]) {
    for subpass in refs.iter() {
        let used = subpass
            .color
            .iter()
            .chain(subpass.input.iter())
            .chain(subpass.depth.iter());
        for reference in used {
            let description = &mut descriptions[reference.attachment as usize];
            if description.initial_layout == vk::ImageLayout::UNDEFINED {
                description.initial_layout = reference.layout;
            }
        }
    }

    if let Some(last) = refs.last_mut() {
        for reference in &last.color {
            descriptions[reference.attachment as usize].final_layout = reference.layout;
        }
        for reference in &last.input {
            descriptions[reference.attachment as usize].final_layout = reference.layout;
            // An attachment read as input in the last subpass cannot also be
            // its depth attachment.
            if is_depth_stencil_format(descriptions[reference.attachment as usize].format) {
                last.depth = None;
            }
        }
        if let Some(depth) = last.depth {
            descriptions[depth.attachment as usize].final_layout = depth.layout;
        }
    }
}

/// One dependency per subpass boundary, transitioning color writes into
/// fragment-shader input reads.
fn subpass_dependencies(subpass_count: usize) -> Vec<vk::SubpassDependency> {
    (1..subpass_count)
        .map(|dst| vk::SubpassDependency {
            src_subpass: dst as u32 - 1,
            dst_subpass: dst as u32,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        })
        .collect()
}

/// An immutable render pass, cache-owned and shared by reference.
pub struct RenderPass {
    device: Device,
    handle: vk::RenderPass,
    color_output_counts: Vec<u32>,
}

impl RenderPass {
    pub(crate) fn new(
        device: &Device,
        attachments: &[Attachment],
        load_store_ops: &[LoadStoreOp],
        subpasses: &[SubpassInfo],
    ) -> Result<RenderPass> {
        // A pass with no declared subpasses renders into every color
        // attachment in a single stage.
        let default_subpass;
        let subpasses = if subpasses.is_empty() {
            default_subpass = [SubpassInfo {
                input_attachments: vec![],
                output_attachments: (0..attachments.len() as u32)
                    .filter(|i| !is_depth_stencil_format(attachments[*i as usize].format))
                    .collect(),
                enable_depth_stencil: true,
            }];
            &default_subpass[..]
        } else {
            subpasses
        };

        let mut descriptions = attachment_descriptions(attachments, load_store_ops);
        let mut refs = subpass_references(subpasses, attachments);
        resolve_attachment_layouts(&mut refs, &mut descriptions);

        let subpass_descriptions: Vec<_> = refs
            .iter()
            .map(|subpass| vk::SubpassDescription {
                pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
                input_attachment_count: subpass.input.len() as u32,
                p_input_attachments: subpass.input.as_ptr(),
                color_attachment_count: subpass.color.len() as u32,
                p_color_attachments: subpass.color.as_ptr(),
                p_depth_stencil_attachment: subpass
                    .depth
                    .as_ref()
                    .map_or(ptr::null(), |depth| depth as *const _),
                ..Default::default()
            })
            .collect();

        let dependencies = subpass_dependencies(refs.len());

        let create_info = vk::RenderPassCreateInfo {
            attachment_count: descriptions.len() as u32,
            p_attachments: descriptions.as_ptr(),
            subpass_count: subpass_descriptions.len() as u32,
            p_subpasses: subpass_descriptions.as_ptr(),
            dependency_count: dependencies.len() as u32,
            p_dependencies: dependencies.as_ptr(),
            ..Default::default()
        };

        let handle = unsafe { device.create_render_pass(&create_info, None)? };
        let color_output_counts = refs.iter().map(|subpass| subpass.color.len() as u32).collect();

        Ok(RenderPass {
            device: device.clone(),
            handle,
            color_output_counts,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn subpass_count(&self) -> u32 {
        self.color_output_counts.len() as u32
    }

    /// Number of color attachments written by the given subpass.
    pub fn color_output_count(&self, subpass_index: u32) -> u32 {
        self.color_output_counts.get(subpass_index as usize).copied().unwrap_or(0)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(initial_layout: vk::ImageLayout) -> Attachment {
        Attachment {
            format: vk::Format::B8G8R8A8_SRGB,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            initial_layout,
            ..Default::default()
        }
    }

    fn depth() -> Attachment {
        Attachment {
            format: vk::Format::D32_SFLOAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        }
    }

    #[test]
    fn final_layouts_follow_format() {
        let descriptions = attachment_descriptions(
            &[color(vk::ImageLayout::UNDEFINED), depth()],
            &[LoadStoreOp::default(), LoadStoreOp::default()],
        );
        assert_eq!(descriptions[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            descriptions[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn undefined_initial_layout_adopts_first_use() {
        let attachments = [color(vk::ImageLayout::UNDEFINED), depth()];
        let subpasses = [SubpassInfo::default()];
        let mut descriptions = attachment_descriptions(&attachments, &[LoadStoreOp::default(); 2]);
        let mut refs = subpass_references(&subpasses, &attachments);
        resolve_attachment_layouts(&mut refs, &mut descriptions);

        assert_eq!(
            descriptions[0].initial_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            descriptions[1].initial_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn depth_read_in_last_subpass_drops_depth_attachment() {
        let attachments = [color(vk::ImageLayout::UNDEFINED), depth()];
        let subpasses = [
            SubpassInfo::default(),
            SubpassInfo {
                input_attachments: vec![1],
                output_attachments: vec![0],
                enable_depth_stencil: true,
            },
        ];
        let mut descriptions = attachment_descriptions(&attachments, &[LoadStoreOp::default(); 2]);
        let mut refs = subpass_references(&subpasses, &attachments);
        resolve_attachment_layouts(&mut refs, &mut descriptions);

        assert!(refs[1].depth.is_none());
        assert_eq!(
            descriptions[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn one_dependency_per_subpass_boundary() {
        assert!(subpass_dependencies(1).is_empty());
        assert_eq!(subpass_dependencies(3).len(), 2);
        let deps = subpass_dependencies(2);
        assert_eq!(deps[0].src_subpass, 0);
        assert_eq!(deps[0].dst_subpass, 1);
    }

    #[test]
    fn color_counts_track_subpass_outputs() {
        let attachments = [color(vk::ImageLayout::UNDEFINED), color(vk::ImageLayout::UNDEFINED), depth()];
        let subpasses = [
            SubpassInfo {
                input_attachments: vec![],
                output_attachments: vec![0, 1],
                enable_depth_stencil: true,
            },
            SubpassInfo {
                input_attachments: vec![1],
                output_attachments: vec![0],
                enable_depth_stencil: false,
            },
        ];
        let refs = subpass_references(&subpasses, &attachments);
        assert_eq!(refs[0].color.len(), 2);
        assert_eq!(refs[1].color.len(), 1);
        assert!(refs[1].depth.is_none());
    }
}

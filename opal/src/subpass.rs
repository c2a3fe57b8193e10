//! The strategy seam for render techniques: a subpass prepares its pipeline
//! objects once and records draws; a render pipeline drives an ordered list
//! of subpasses through one render pass.
use crate::{
    cache::ResourceCache, command_buffer::CommandBuffer, render_pass::LoadStoreOp, render_target::RenderTarget,
    Result, vk,
};

/// One stage of a render pass.
///
/// Implementations own their shader sources and per-technique state; the
/// frame machinery dispatches through this trait only. The attachment
/// accessors describe which render-target attachments the subpass consumes
/// and produces, by index.
pub trait Subpass {
    /// Resolves the objects the subpass needs ahead of recording, through
    /// the shared cache.
    fn prepare(&mut self, cache: &ResourceCache) -> Result<()>;

    /// Records the subpass's draw work. The command buffer is inside the
    /// render pass, positioned at this subpass's index.
    fn draw(&mut self, command_buffer: &mut CommandBuffer) -> Result<()>;

    /// Attachment indices read as input attachments. Defaults to none.
    fn input_attachments(&self) -> &[u32] {
        &[]
    }

    /// Attachment indices written as color outputs. Defaults to the
    /// swapchain attachment.
    fn output_attachments(&self) -> &[u32] {
        &[0]
    }

    fn enable_depth_stencil(&self) -> bool {
        true
    }
}

/// An ordered list of subpasses drawn through a single render pass.
pub struct RenderPipeline {
    subpasses: Vec<Box<dyn Subpass>>,
    load_store_ops: Vec<LoadStoreOp>,
    clear_values: Vec<vk::ClearValue>,
}

impl Default for RenderPipeline {
    fn default() -> Self {
        RenderPipeline::new()
    }
}

impl RenderPipeline {
    /// An empty pipeline with clear/load-store defaults for a color plus
    /// reversed-depth render target.
    pub fn new() -> RenderPipeline {
        RenderPipeline {
            subpasses: vec![],
            load_store_ops: vec![LoadStoreOp::default(); 2],
            clear_values: vec![
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 1.0],
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: !0 },
                },
            ],
        }
    }

    /// Prepares the subpass through the cache and appends it to the draw
    /// order.
    pub fn add_subpass(&mut self, mut subpass: Box<dyn Subpass>, cache: &ResourceCache) -> Result<()> {
        subpass.prepare(cache)?;
        self.subpasses.push(subpass);
        Ok(())
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    pub fn load_store_ops(&self) -> &[LoadStoreOp] {
        &self.load_store_ops
    }

    pub fn set_load_store_ops(&mut self, load_store_ops: Vec<LoadStoreOp>) {
        self.load_store_ops = load_store_ops;
    }

    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    pub fn set_clear_values(&mut self, clear_values: Vec<vk::ClearValue>) {
        self.clear_values = clear_values;
    }

    /// Begins the render pass over `render_target` and records every subpass
    /// in order, advancing the subpass index between them.
    pub fn draw(&mut self, command_buffer: &mut CommandBuffer, render_target: &RenderTarget) -> Result<()> {
        {
            let subpasses: Vec<&dyn Subpass> = self.subpasses.iter().map(|subpass| subpass.as_ref()).collect();
            command_buffer.begin_render_pass(render_target, &self.load_store_ops, &self.clear_values, &subpasses)?;
        }
        for (index, subpass) in self.subpasses.iter_mut().enumerate() {
            if index > 0 {
                command_buffer.next_subpass()?;
            }
            subpass.draw(command_buffer)?;
        }
        command_buffer.end_render_pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Overlay;

    impl Subpass for Overlay {
        fn prepare(&mut self, _cache: &ResourceCache) -> Result<()> {
            Ok(())
        }

        fn draw(&mut self, _command_buffer: &mut CommandBuffer) -> Result<()> {
            Ok(())
        }

        fn enable_depth_stencil(&self) -> bool {
            false
        }
    }

    #[test]
    fn trait_defaults_target_the_swapchain_attachment() {
        let overlay = Overlay;
        assert!(overlay.input_attachments().is_empty());
        assert_eq!(overlay.output_attachments(), &[0]);
        assert!(!overlay.enable_depth_stencil());
    }

    #[test]
    fn defaults_pair_color_with_reversed_depth() {
        let pipeline = RenderPipeline::new();
        assert_eq!(pipeline.subpass_count(), 0);
        assert_eq!(pipeline.load_store_ops().len(), 2);
        assert_eq!(pipeline.clear_values().len(), 2);
        unsafe {
            assert_eq!(pipeline.clear_values()[0].color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(pipeline.clear_values()[1].depth_stencil.depth, 0.0);
        }
    }
}

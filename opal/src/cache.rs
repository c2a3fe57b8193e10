//! Content-addressed cache of immutable GPU objects.
//!
//! Every cacheable type is stored in its own `key -> Arc<object>` map behind
//! its own mutex, so unrelated categories never contend. Keys are value
//! objects deriving `Eq`/`Hash` from the semantic construction arguments;
//! two semantically identical requests always return the same `Arc`.
use crate::{
    descriptor::DescriptorSetLayout,
    device::Device,
    framebuffer::Framebuffer,
    pipeline::{GraphicsPipeline, PipelineLayout, PipelineState, PipelineStateKey},
    render_pass::{Attachment, LoadStoreOp, RenderPass, SubpassInfo},
    render_target::RenderTarget,
    shader::{ShaderModule, ShaderResource, ShaderSource, ShaderVariant},
    Error, Result, vk,
};
use fxhash::FxHashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, PartialEq, Eq, Hash)]
struct ShaderModuleKey {
    stage: vk::ShaderStageFlags,
    source_id: u64,
    variant_id: u64,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct RenderPassKey {
    attachments: Vec<Attachment>,
    load_store_ops: Vec<LoadStoreOp>,
    subpasses: Vec<SubpassInfo>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct FramebufferKey {
    // View and image handles are legitimate key material here: the
    // framebuffer is invalidated together with the images it references.
    views: Vec<(vk::ImageView, vk::Image)>,
    render_pass: vk::RenderPass,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineLayoutKey {
    module_ids: Vec<u64>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct DescriptorSetLayoutKey {
    set_index: u32,
    module_ids: Vec<u64>,
    resources: Vec<ShaderResource>,
}

/// Looks up `key` in `store`, constructing and inserting on a miss.
///
/// The category lock is held across construction: concurrent identical
/// requests serialize instead of racing to build duplicate GPU objects.
fn request<K, T>(
    store: &Mutex<FxHashMap<K, Arc<T>>>,
    key: K,
    build: impl FnOnce() -> Result<T>,
) -> Result<Arc<T>>
where
    K: std::hash::Hash + Eq,
{
    let mut store = store.lock().unwrap();
    if let Some(existing) = store.get(&key) {
        return Ok(existing.clone());
    }
    let created = Arc::new(build()?);
    store.insert(key, created.clone());
    Ok(created)
}

/// Deduplicates immutable derived objects by the content of their
/// construction arguments.
pub struct ResourceCache {
    device: Device,
    shader_modules: Mutex<FxHashMap<ShaderModuleKey, Arc<ShaderModule>>>,
    render_passes: Mutex<FxHashMap<RenderPassKey, Arc<RenderPass>>>,
    framebuffers: Mutex<FxHashMap<FramebufferKey, Arc<Framebuffer>>>,
    pipeline_layouts: Mutex<FxHashMap<PipelineLayoutKey, Arc<PipelineLayout>>>,
    descriptor_set_layouts: Mutex<FxHashMap<DescriptorSetLayoutKey, Arc<DescriptorSetLayout>>>,
    graphics_pipelines: Mutex<FxHashMap<PipelineStateKey, Arc<GraphicsPipeline>>>,
}

impl ResourceCache {
    pub fn new(device: Device) -> ResourceCache {
        ResourceCache {
            device,
            shader_modules: Default::default(),
            render_passes: Default::default(),
            framebuffers: Default::default(),
            pipeline_layouts: Default::default(),
            descriptor_set_layouts: Default::default(),
            graphics_pipelines: Default::default(),
        }
    }

    pub fn request_shader_module(
        &self,
        stage: vk::ShaderStageFlags,
        source: &ShaderSource,
        variant: &ShaderVariant,
    ) -> Result<Arc<ShaderModule>> {
        let key = ShaderModuleKey {
            stage,
            source_id: source.id(),
            variant_id: variant.id(),
        };
        request(&self.shader_modules, key, || {
            Ok(ShaderModule::new(stage, source, "main", variant))
        })
    }

    pub fn request_render_pass(
        &self,
        attachments: &[Attachment],
        load_store_ops: &[LoadStoreOp],
        subpasses: &[SubpassInfo],
    ) -> Result<Arc<RenderPass>> {
        let key = RenderPassKey {
            attachments: attachments.to_vec(),
            load_store_ops: load_store_ops.to_vec(),
            subpasses: subpasses.to_vec(),
        };
        request(&self.render_passes, key, || {
            RenderPass::new(&self.device, attachments, load_store_ops, subpasses)
        })
    }

    pub fn request_framebuffer(
        &self,
        render_target: &RenderTarget,
        render_pass: &RenderPass,
    ) -> Result<Arc<Framebuffer>> {
        let key = FramebufferKey {
            views: render_target
                .views()
                .iter()
                .map(|view| (view.handle(), view.image()))
                .collect(),
            render_pass: render_pass.handle(),
        };
        request(&self.framebuffers, key, || {
            Framebuffer::new(&self.device, render_target, render_pass)
        })
    }

    pub fn request_pipeline_layout(&self, shader_modules: Vec<Arc<ShaderModule>>) -> Result<Arc<PipelineLayout>> {
        let key = PipelineLayoutKey {
            module_ids: shader_modules.iter().map(|module| module.id()).collect(),
        };
        request(&self.pipeline_layouts, key, || {
            PipelineLayout::new(&self.device, self, shader_modules)
        })
    }

    pub fn request_descriptor_set_layout(
        &self,
        set_index: u32,
        shader_modules: &[Arc<ShaderModule>],
        shader_resources: &[ShaderResource],
    ) -> Result<Arc<DescriptorSetLayout>> {
        let key = DescriptorSetLayoutKey {
            set_index,
            module_ids: shader_modules.iter().map(|module| module.id()).collect(),
            resources: shader_resources.to_vec(),
        };
        request(&self.descriptor_set_layouts, key, || {
            DescriptorSetLayout::new(&self.device, set_index, shader_resources)
        })
    }

    pub fn request_graphics_pipeline(&self, state: &PipelineState) -> Result<Arc<GraphicsPipeline>> {
        let key = state.key().ok_or(Error::InvalidState {
            op: "request_graphics_pipeline",
        })?;
        request(&self.graphics_pipelines, key, || {
            GraphicsPipeline::new(&self.device, state)
        })
    }

    /// Drops all cached framebuffers. Called when the swapchain is rebuilt:
    /// framebuffers reference the old image views, while render passes and
    /// pipelines are format-keyed and survive.
    pub fn clear_framebuffers(&self) {
        self.framebuffers.lock().unwrap().clear();
    }

    /// Drops all cached pipelines and pipeline layouts.
    pub fn clear_pipelines(&self) {
        self.graphics_pipelines.lock().unwrap().clear();
        self.pipeline_layouts.lock().unwrap().clear();
    }

    /// Drops everything. Callers must ensure the GPU is idle first.
    pub fn clear(&self) {
        self.clear_pipelines();
        self.clear_framebuffers();
        self.render_passes.lock().unwrap().clear();
        self.descriptor_set_layouts.lock().unwrap().clear();
        self.shader_modules.lock().unwrap().clear();
    }

    pub fn shader_module_count(&self) -> usize {
        self.shader_modules.lock().unwrap().len()
    }

    pub fn render_pass_count(&self) -> usize {
        self.render_passes.lock().unwrap().len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.lock().unwrap().len()
    }

    pub fn pipeline_layout_count(&self) -> usize {
        self.pipeline_layouts.lock().unwrap().len()
    }

    pub fn descriptor_set_layout_count(&self) -> usize {
        self.descriptor_set_layouts.lock().unwrap().len()
    }

    pub fn graphics_pipeline_count(&self) -> usize {
        self.graphics_pipelines.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxhash::FxHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = FxHasher::default();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn color_attachment(format: vk::Format) -> Attachment {
        Attachment {
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..Default::default()
        }
    }

    #[test]
    fn equal_render_pass_arguments_make_equal_keys() {
        let a = RenderPassKey {
            attachments: vec![color_attachment(vk::Format::B8G8R8A8_SRGB)],
            load_store_ops: vec![LoadStoreOp::default()],
            subpasses: vec![SubpassInfo::default()],
        };
        let b = RenderPassKey {
            attachments: vec![color_attachment(vk::Format::B8G8R8A8_SRGB)],
            load_store_ops: vec![LoadStoreOp::default()],
            subpasses: vec![SubpassInfo::default()],
        };
        assert!(a == b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn distinct_render_pass_arguments_make_distinct_keys() {
        let a = RenderPassKey {
            attachments: vec![color_attachment(vk::Format::B8G8R8A8_SRGB)],
            load_store_ops: vec![LoadStoreOp::default()],
            subpasses: vec![SubpassInfo::default()],
        };
        let mut b = a.clone();
        b.attachments[0].format = vk::Format::R8G8B8A8_UNORM;
        assert!(a != b);

        let mut c = a.clone();
        c.load_store_ops[0].load_op = vk::AttachmentLoadOp::LOAD;
        assert!(a != c);
    }

    #[test]
    fn attachment_order_is_significant() {
        let color = color_attachment(vk::Format::B8G8R8A8_SRGB);
        let depth = Attachment {
            format: vk::Format::D32_SFLOAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        let ops = vec![LoadStoreOp::default(), LoadStoreOp::default()];
        let a = RenderPassKey {
            attachments: vec![color, depth],
            load_store_ops: ops.clone(),
            subpasses: vec![SubpassInfo::default()],
        };
        let b = RenderPassKey {
            attachments: vec![depth, color],
            load_store_ops: ops,
            subpasses: vec![SubpassInfo::default()],
        };
        assert!(a != b);
    }

    #[test]
    fn descriptor_set_layout_keys_track_resources() {
        use crate::shader::{ShaderResourceMode, ShaderResourceType};
        let resource = ShaderResource {
            name: "ubo".into(),
            stages: vk::ShaderStageFlags::VERTEX,
            ty: ShaderResourceType::BufferUniform,
            mode: ShaderResourceMode::Static,
            set: 0,
            binding: 0,
            ..Default::default()
        };
        let a = DescriptorSetLayoutKey {
            set_index: 0,
            module_ids: vec![1],
            resources: vec![resource.clone()],
        };
        let b = DescriptorSetLayoutKey {
            set_index: 0,
            module_ids: vec![1],
            resources: vec![ShaderResource {
                mode: ShaderResourceMode::Dynamic,
                ..resource
            }],
        };
        assert!(a != b);
    }
}

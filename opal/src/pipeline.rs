//! Graphics pipeline state, pipeline layouts and pipeline objects.
//!
//! The sub-state structs are value objects deriving `Eq`/`Hash`; the cache
//! keys built from them replace any hand-rolled hash combining.
use crate::{
    cache::ResourceCache,
    descriptor::DescriptorSetLayout,
    device::Device,
    render_pass::RenderPass,
    shader::{ShaderModule, ShaderResource, ShaderResourceType},
    Error, Result, vk,
};
use ordered_float::OrderedFloat;
use std::{collections::BTreeMap, ffi::CString, sync::Arc};
use fxhash::FxHashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RasterizationState {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_enable: bool,
}

impl Default for RasterizationState {
    fn default() -> Self {
        RasterizationState {
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MultisampleState {
    pub rasterization_samples: vk::SampleCountFlags,
    pub sample_shading_enable: bool,
    pub min_sample_shading: OrderedFloat<f32>,
    pub sample_mask: vk::SampleMask,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        MultisampleState {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: false,
            min_sample_shading: OrderedFloat(0.0),
            sample_mask: 0,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexInputState {
    pub bindings: Vec<VertexInputBinding>,
    pub attributes: Vec<VertexInputAttribute>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InputAssemblyState {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

impl Default for InputAssemblyState {
    fn default() -> Self {
        InputAssemblyState {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewportState {
    pub viewport_count: u32,
    pub scissor_count: u32,
}

impl Default for ViewportState {
    fn default() -> Self {
        ViewportState {
            viewport_count: 1,
            scissor_count: 1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StencilOpState {
    pub fail_op: vk::StencilOp,
    pub pass_op: vk::StencilOp,
    pub depth_fail_op: vk::StencilOp,
    pub compare_op: vk::CompareOp,
}

impl Default for StencilOpState {
    fn default() -> Self {
        StencilOpState {
            fail_op: vk::StencilOp::REPLACE,
            pass_op: vk::StencilOp::REPLACE,
            depth_fail_op: vk::StencilOp::REPLACE,
            compare_op: vk::CompareOp::NEVER,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front: StencilOpState,
    pub back: StencilOpState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        DepthStencilState {
            depth_test_enable: true,
            depth_write_enable: true,
            // Reversed depth buffer: greater values are closer.
            depth_compare_op: vk::CompareOp::GREATER,
            depth_bounds_test_enable: false,
            stencil_test_enable: false,
            front: StencilOpState::default(),
            back: StencilOpState::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColorBlendAttachmentState {
    pub blend_enable: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub color_blend_op: vk::BlendOp,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
    pub alpha_blend_op: vk::BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachmentState {
    fn default() -> Self {
        ColorBlendAttachmentState {
            blend_enable: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColorBlendState {
    pub logic_op_enable: bool,
    pub logic_op: vk::LogicOp,
    pub attachments: Vec<ColorBlendAttachmentState>,
}

impl Default for ColorBlendState {
    fn default() -> Self {
        ColorBlendState {
            logic_op_enable: false,
            logic_op: vk::LogicOp::CLEAR,
            attachments: vec![],
        }
    }
}

/// The full mutable pipeline description carried by a command buffer. A
/// dirty flag coalesces redundant state changes; a pipeline is only resolved
/// from the cache when the state actually changed since the last flush.
#[derive(Clone, Default)]
pub struct PipelineState {
    pipeline_layout: Option<Arc<PipelineLayout>>,
    render_pass: Option<Arc<RenderPass>>,
    rasterization: RasterizationState,
    multisample: MultisampleState,
    vertex_input: VertexInputState,
    input_assembly: InputAssemblyState,
    viewport: ViewportState,
    depth_stencil: DepthStencilState,
    color_blend: ColorBlendState,
    subpass_index: u32,
    dirty: bool,
}

macro_rules! state_setter {
    ($setter:ident, $getter:ident, $field:ident, $ty:ty) => {
        pub fn $setter(&mut self, state: $ty) {
            if self.$field != state {
                self.$field = state;
                self.dirty = true;
            }
        }

        pub fn $getter(&self) -> &$ty {
            &self.$field
        }
    };
}

impl PipelineState {
    state_setter!(set_rasterization, rasterization, rasterization, RasterizationState);
    state_setter!(set_multisample, multisample, multisample, MultisampleState);
    state_setter!(set_vertex_input, vertex_input, vertex_input, VertexInputState);
    state_setter!(set_input_assembly, input_assembly, input_assembly, InputAssemblyState);
    state_setter!(set_viewport_state, viewport_state, viewport, ViewportState);
    state_setter!(set_depth_stencil, depth_stencil, depth_stencil, DepthStencilState);
    state_setter!(set_color_blend, color_blend, color_blend, ColorBlendState);

    pub fn set_pipeline_layout(&mut self, layout: Arc<PipelineLayout>) {
        match &self.pipeline_layout {
            Some(current) if current.handle() == layout.handle() => {}
            _ => {
                self.pipeline_layout = Some(layout);
                self.dirty = true;
            }
        }
    }

    pub fn set_render_pass(&mut self, render_pass: Arc<RenderPass>) {
        match &self.render_pass {
            Some(current) if current.handle() == render_pass.handle() => {}
            _ => {
                self.render_pass = Some(render_pass);
                self.dirty = true;
            }
        }
    }

    pub fn set_subpass_index(&mut self, index: u32) {
        if self.subpass_index != index {
            self.subpass_index = index;
            self.dirty = true;
        }
    }

    pub fn pipeline_layout(&self) -> Option<&Arc<PipelineLayout>> {
        self.pipeline_layout.as_ref()
    }

    pub fn render_pass(&self) -> Option<&Arc<RenderPass>> {
        self.render_pass.as_ref()
    }

    pub fn subpass_index(&self) -> u32 {
        self.subpass_index
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn reset(&mut self) {
        *self = PipelineState::default();
    }

    /// The structural cache key for this state, available once a layout and
    /// a render pass are bound. Sub-object handles are cache-stable, so the
    /// key hashes them rather than their construction arguments.
    pub(crate) fn key(&self) -> Option<PipelineStateKey> {
        Some(PipelineStateKey {
            layout: self.pipeline_layout.as_ref()?.handle(),
            render_pass: self.render_pass.as_ref()?.handle(),
            subpass_index: self.subpass_index,
            rasterization: self.rasterization,
            multisample: self.multisample,
            vertex_input: self.vertex_input.clone(),
            input_assembly: self.input_assembly,
            viewport: self.viewport,
            depth_stencil: self.depth_stencil,
            color_blend: self.color_blend.clone(),
        })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct PipelineStateKey {
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    subpass_index: u32,
    rasterization: RasterizationState,
    multisample: MultisampleState,
    vertex_input: VertexInputState,
    input_assembly: InputAssemblyState,
    viewport: ViewportState,
    depth_stencil: DepthStencilState,
    color_blend: ColorBlendState,
}

/// Collects the stages whose declared push-constant range covers the byte
/// range `[offset, offset + size)`.
pub(crate) fn push_constant_range_stages<'a>(
    resources: impl IntoIterator<Item = &'a ShaderResource>,
    offset: u32,
    size: u32,
) -> vk::ShaderStageFlags {
    let mut stages = vk::ShaderStageFlags::empty();
    for resource in resources {
        if resource.ty != ShaderResourceType::PushConstant {
            continue;
        }
        if offset >= resource.offset && offset + size <= resource.offset + resource.size {
            stages |= resource.stages;
        }
    }
    stages
}

/// An immutable pipeline layout derived from the combined reflection of its
/// shader modules. One descriptor set layout is requested from the cache per
/// shader set.
pub struct PipelineLayout {
    device: Device,
    handle: vk::PipelineLayout,
    shader_modules: Vec<Arc<ShaderModule>>,
    shader_resources: FxHashMap<String, ShaderResource>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl PipelineLayout {
    pub(crate) fn new(
        device: &Device,
        cache: &ResourceCache,
        shader_modules: Vec<Arc<ShaderModule>>,
    ) -> Result<PipelineLayout> {
        // Collect and combine the resources of all stages. Stage interface
        // variables keep one entry per stage; everything else merges by name
        // with the stage masks OR-ed together.
        let mut shader_resources: FxHashMap<String, ShaderResource> = FxHashMap::default();
        for module in &shader_modules {
            for resource in module.resources() {
                let key = if matches!(resource.ty, ShaderResourceType::Input | ShaderResourceType::Output) {
                    format!("{:?}_{}", resource.stages, resource.name)
                } else {
                    resource.name.clone()
                };
                shader_resources
                    .entry(key)
                    .and_modify(|existing| existing.stages |= resource.stages)
                    .or_insert_with(|| resource.clone());
            }
        }

        // Separate the resources into their descriptor sets, in a
        // deterministic order so cache keys built downstream are stable.
        let mut shader_sets: BTreeMap<u32, Vec<ShaderResource>> = BTreeMap::new();
        for resource in shader_resources.values() {
            if matches!(
                resource.ty,
                ShaderResourceType::Input
                    | ShaderResourceType::Output
                    | ShaderResourceType::PushConstant
                    | ShaderResourceType::SpecializationConstant
            ) {
                continue;
            }
            shader_sets.entry(resource.set).or_default().push(resource.clone());
        }
        for resources in shader_sets.values_mut() {
            resources.sort_by(|a, b| a.binding.cmp(&b.binding).then_with(|| a.name.cmp(&b.name)));
        }

        let mut set_layouts = vec![];
        for (&set_index, resources) in &shader_sets {
            set_layouts.push(cache.request_descriptor_set_layout(set_index, &shader_modules, resources)?);
        }

        let set_layout_handles: Vec<_> = set_layouts.iter().map(|layout| layout.handle()).collect();

        let mut push_constant_ranges: Vec<_> = shader_resources
            .values()
            .filter(|resource| resource.ty == ShaderResourceType::PushConstant)
            .map(|resource| vk::PushConstantRange {
                stage_flags: resource.stages,
                offset: resource.offset,
                size: resource.size,
            })
            .collect();
        push_constant_ranges.sort_by_key(|range| range.offset);

        let create_info = vk::PipelineLayoutCreateInfo {
            set_layout_count: set_layout_handles.len() as u32,
            p_set_layouts: set_layout_handles.as_ptr(),
            push_constant_range_count: push_constant_ranges.len() as u32,
            p_push_constant_ranges: push_constant_ranges.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { device.create_pipeline_layout(&create_info, None)? };

        Ok(PipelineLayout {
            device: device.clone(),
            handle,
            shader_modules,
            shader_resources,
            set_layouts,
        })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    pub fn shader_modules(&self) -> &[Arc<ShaderModule>] {
        &self.shader_modules
    }

    pub fn has_descriptor_set_layout(&self, set_index: u32) -> bool {
        self.descriptor_set_layout(set_index).is_some()
    }

    pub fn descriptor_set_layout(&self, set_index: u32) -> Option<&Arc<DescriptorSetLayout>> {
        self.set_layouts.iter().find(|layout| layout.set_index() == set_index)
    }

    pub fn shader_resources(&self, ty: ShaderResourceType) -> Vec<&ShaderResource> {
        self.shader_resources.values().filter(|r| r.ty == ty).collect()
    }

    /// The stage mask covering a push of `size` bytes at `offset`.
    pub fn push_constant_stages(&self, offset: u32, size: u32) -> vk::ShaderStageFlags {
        push_constant_range_stages(self.shader_resources.values(), offset, size)
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline_layout(self.handle, None) };
    }
}

/// An immutable graphics pipeline compiled from a [`PipelineState`].
pub struct GraphicsPipeline {
    device: Device,
    handle: vk::Pipeline,
}

impl GraphicsPipeline {
    pub(crate) fn new(device: &Device, state: &PipelineState) -> Result<GraphicsPipeline> {
        let layout = state
            .pipeline_layout()
            .ok_or(Error::InvalidState { op: "GraphicsPipeline::new" })?;
        let render_pass = state
            .render_pass()
            .ok_or(Error::InvalidState { op: "GraphicsPipeline::new" })?;

        // Shader modules only live for the duration of pipeline creation.
        let entry_points: Vec<_> = layout
            .shader_modules()
            .iter()
            .map(|module| CString::new(module.entry_point()).expect("entry point contains a nul byte"))
            .collect();
        let mut vk_modules = vec![];
        let mut stages = vec![];
        let destroy_modules = |modules: &[vk::ShaderModule]| {
            for module in modules {
                unsafe { device.destroy_shader_module(*module, None) };
            }
        };
        for (module, entry_point) in layout.shader_modules().iter().zip(&entry_points) {
            let create_info = vk::ShaderModuleCreateInfo {
                code_size: module.spirv().len() * std::mem::size_of::<u32>(),
                p_code: module.spirv().as_ptr(),
                ..Default::default()
            };
            let vk_module = match unsafe { device.create_shader_module(&create_info, None) } {
                Ok(vk_module) => vk_module,
                Err(err) => {
                    destroy_modules(&vk_modules);
                    return Err(err.into());
                }
            };
            vk_modules.push(vk_module);
            stages.push(vk::PipelineShaderStageCreateInfo {
                stage: module.stage(),
                module: vk_module,
                p_name: entry_point.as_ptr(),
                ..Default::default()
            });
        }

        let vertex_bindings: Vec<_> = state
            .vertex_input()
            .bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: binding.input_rate,
            })
            .collect();
        let vertex_attributes: Vec<_> = state
            .vertex_input()
            .attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: attribute.format,
                offset: attribute.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            vertex_binding_description_count: vertex_bindings.len() as u32,
            p_vertex_binding_descriptions: vertex_bindings.as_ptr(),
            vertex_attribute_description_count: vertex_attributes.len() as u32,
            p_vertex_attribute_descriptions: vertex_attributes.as_ptr(),
            ..Default::default()
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            topology: state.input_assembly().topology,
            primitive_restart_enable: state.input_assembly().primitive_restart_enable.into(),
            ..Default::default()
        };

        let viewport = vk::PipelineViewportStateCreateInfo {
            viewport_count: state.viewport_state().viewport_count,
            scissor_count: state.viewport_state().scissor_count,
            ..Default::default()
        };

        let rasterization = vk::PipelineRasterizationStateCreateInfo {
            depth_clamp_enable: state.rasterization().depth_clamp_enable.into(),
            rasterizer_discard_enable: state.rasterization().rasterizer_discard_enable.into(),
            polygon_mode: state.rasterization().polygon_mode,
            cull_mode: state.rasterization().cull_mode,
            front_face: state.rasterization().front_face,
            depth_bias_enable: state.rasterization().depth_bias_enable.into(),
            depth_bias_clamp: 1.0,
            depth_bias_slope_factor: 1.0,
            line_width: 1.0,
            ..Default::default()
        };

        let sample_mask = state.multisample().sample_mask;
        let mut multisample = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: state.multisample().rasterization_samples,
            sample_shading_enable: state.multisample().sample_shading_enable.into(),
            min_sample_shading: state.multisample().min_sample_shading.into_inner(),
            alpha_to_coverage_enable: state.multisample().alpha_to_coverage_enable.into(),
            alpha_to_one_enable: state.multisample().alpha_to_one_enable.into(),
            ..Default::default()
        };
        if sample_mask != 0 {
            multisample.p_sample_mask = &sample_mask;
        }

        let stencil_op = |op: &StencilOpState| vk::StencilOpState {
            fail_op: op.fail_op,
            pass_op: op.pass_op,
            depth_fail_op: op.depth_fail_op,
            compare_op: op.compare_op,
            compare_mask: !0,
            write_mask: !0,
            reference: !0,
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            depth_test_enable: state.depth_stencil().depth_test_enable.into(),
            depth_write_enable: state.depth_stencil().depth_write_enable.into(),
            depth_compare_op: state.depth_stencil().depth_compare_op,
            depth_bounds_test_enable: state.depth_stencil().depth_bounds_test_enable.into(),
            stencil_test_enable: state.depth_stencil().stencil_test_enable.into(),
            front: stencil_op(&state.depth_stencil().front),
            back: stencil_op(&state.depth_stencil().back),
            ..Default::default()
        };

        let blend_attachments: Vec<_> = state
            .color_blend()
            .attachments
            .iter()
            .map(|attachment| vk::PipelineColorBlendAttachmentState {
                blend_enable: attachment.blend_enable.into(),
                src_color_blend_factor: attachment.src_color_blend_factor,
                dst_color_blend_factor: attachment.dst_color_blend_factor,
                color_blend_op: attachment.color_blend_op,
                src_alpha_blend_factor: attachment.src_alpha_blend_factor,
                dst_alpha_blend_factor: attachment.dst_alpha_blend_factor,
                alpha_blend_op: attachment.alpha_blend_op,
                color_write_mask: attachment.color_write_mask,
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            logic_op_enable: state.color_blend().logic_op_enable.into(),
            logic_op: state.color_blend().logic_op,
            attachment_count: blend_attachments.len() as u32,
            p_attachments: blend_attachments.as_ptr(),
            blend_constants: [1.0; 4],
            ..Default::default()
        };

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
            vk::DynamicState::DEPTH_BIAS,
            vk::DynamicState::BLEND_CONSTANTS,
            vk::DynamicState::DEPTH_BOUNDS,
            vk::DynamicState::STENCIL_COMPARE_MASK,
            vk::DynamicState::STENCIL_WRITE_MASK,
            vk::DynamicState::STENCIL_REFERENCE,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let create_info = vk::GraphicsPipelineCreateInfo {
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport,
            p_rasterization_state: &rasterization,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: layout.handle(),
            render_pass: render_pass.handle(),
            subpass: state.subpass_index(),
            ..Default::default()
        };

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        destroy_modules(&vk_modules);

        let handle = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => return Err(err.into()),
        };

        Ok(GraphicsPipeline {
            device: device.clone(),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderResourceMode;

    #[test]
    fn redundant_state_changes_do_not_mark_dirty() {
        let mut state = PipelineState::default();
        assert!(!state.is_dirty());

        state.set_rasterization(RasterizationState::default());
        assert!(!state.is_dirty());

        state.set_rasterization(RasterizationState {
            cull_mode: vk::CullModeFlags::NONE,
            ..Default::default()
        });
        assert!(state.is_dirty());

        state.clear_dirty();
        state.set_rasterization(RasterizationState {
            cull_mode: vk::CullModeFlags::NONE,
            ..Default::default()
        });
        assert!(!state.is_dirty());
    }

    #[test]
    fn subpass_index_changes_mark_dirty() {
        let mut state = PipelineState::default();
        state.set_subpass_index(0);
        assert!(!state.is_dirty());
        state.set_subpass_index(1);
        assert!(state.is_dirty());
    }

    #[test]
    fn push_constant_stages_cover_declared_ranges() {
        let ranges = [
            ShaderResource {
                name: "vs_push".into(),
                stages: vk::ShaderStageFlags::VERTEX,
                ty: ShaderResourceType::PushConstant,
                mode: ShaderResourceMode::Static,
                offset: 0,
                size: 64,
                ..Default::default()
            },
            ShaderResource {
                name: "fs_push".into(),
                stages: vk::ShaderStageFlags::FRAGMENT,
                ty: ShaderResourceType::PushConstant,
                mode: ShaderResourceMode::Static,
                offset: 64,
                size: 16,
                ..Default::default()
            },
        ];

        assert_eq!(
            push_constant_range_stages(&ranges, 0, 64),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            push_constant_range_stages(&ranges, 64, 16),
            vk::ShaderStageFlags::FRAGMENT
        );
        // A range nothing declares stays empty.
        assert_eq!(
            push_constant_range_stages(&ranges, 0, 128),
            vk::ShaderStageFlags::empty()
        );
    }

    #[test]
    fn push_constant_stages_ignore_other_resource_types() {
        let resources = [ShaderResource {
            name: "ubo".into(),
            stages: vk::ShaderStageFlags::VERTEX,
            ty: ShaderResourceType::BufferUniform,
            offset: 0,
            size: 64,
            ..Default::default()
        }];
        assert_eq!(
            push_constant_range_stages(&resources, 0, 16),
            vk::ShaderStageFlags::empty()
        );
    }
}

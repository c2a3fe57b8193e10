//! Command recording with deferred pipeline and descriptor resolution.
use crate::{
    binding_state::{BindingMap, ResourceBindingState},
    buffer::Buffer,
    cache::ResourceCache,
    descriptor::{is_buffer_descriptor, is_dynamic_buffer_descriptor, BufferBinding, ImageBinding},
    device::Device,
    frame::{DescriptorSetStrategy, FrameDescriptors},
    framebuffer::Framebuffer,
    image::ImageView,
    is_depth_stencil_format,
    pipeline::{
        ColorBlendAttachmentState, ColorBlendState, DepthStencilState, InputAssemblyState, MultisampleState,
        PipelineLayout, PipelineState, RasterizationState, VertexInputState,
    },
    render_pass::{LoadStoreOp, RenderPass, SubpassInfo},
    render_target::RenderTarget,
    subpass::Subpass,
    Error, Result, vk,
};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Layout transition parameters for an image view during recording.
#[derive(Copy, Clone, Debug)]
pub struct ImageMemoryBarrier {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub old_queue_family: u32,
    pub new_queue_family: u32,
}

impl Default for ImageMemoryBarrier {
    fn default() -> Self {
        ImageMemoryBarrier {
            src_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            old_queue_family: vk::QUEUE_FAMILY_IGNORED,
            new_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Executable,
}

struct RenderPassBinding {
    render_pass: Arc<RenderPass>,
    framebuffer: Arc<Framebuffer>,
}

/// A recording handle over one pooled `VkCommandBuffer`, carrying the
/// mutable pipeline description and resource bindings that get resolved
/// against the cache when a draw is flushed.
///
/// The recording state machine is `Initial -> Recording -> Executable`:
/// [`begin`](Self::begin) is legal outside `Recording`, [`end`](Self::end)
/// only while `Recording`, and any flush only while `Recording`.
pub struct CommandBuffer {
    device: Device,
    handle: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
    thread_index: usize,
    state: RecordingState,
    cache: Arc<ResourceCache>,
    descriptors: Arc<Mutex<FrameDescriptors>>,
    descriptor_strategy: DescriptorSetStrategy,
    pipeline_state: PipelineState,
    binding_state: ResourceBindingState,
    stored_push_constants: Vec<u8>,
    render_pass_binding: Option<RenderPassBinding>,
}

impl CommandBuffer {
    pub(crate) fn new(
        device: Device,
        handle: vk::CommandBuffer,
        level: vk::CommandBufferLevel,
        thread_index: usize,
        cache: Arc<ResourceCache>,
        descriptors: Arc<Mutex<FrameDescriptors>>,
        descriptor_strategy: DescriptorSetStrategy,
    ) -> CommandBuffer {
        CommandBuffer {
            device,
            handle,
            level,
            thread_index,
            state: RecordingState::Initial,
            cache,
            descriptors,
            descriptor_strategy,
            pipeline_state: PipelineState::default(),
            binding_state: ResourceBindingState::default(),
            stored_push_constants: vec![],
            render_pass_binding: None,
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn is_executable(&self) -> bool {
        self.state == RecordingState::Executable
    }

    /// Starts recording, clearing all pipeline and binding state carried
    /// over from a previous recording of the same handle.
    pub fn begin(&mut self, usage: vk::CommandBufferUsageFlags) -> Result<()> {
        if self.state == RecordingState::Recording {
            return Err(Error::InvalidState { op: "begin" });
        }
        let begin_info = vk::CommandBufferBeginInfo {
            flags: usage,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(self.handle, &begin_info)? };
        self.state = RecordingState::Recording;
        self.pipeline_state.reset();
        self.binding_state.reset();
        self.stored_push_constants.clear();
        self.render_pass_binding = None;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(Error::InvalidState { op: "end" });
        }
        unsafe { self.device.end_command_buffer(self.handle)? };
        self.state = RecordingState::Executable;
        Ok(())
    }

    /// Resolves a render pass and framebuffer for `render_target` through
    /// the cache and begins the pass. Nothing is recorded if either lookup
    /// fails.
    pub fn begin_render_pass(
        &mut self,
        render_target: &RenderTarget,
        load_store_ops: &[LoadStoreOp],
        clear_values: &[vk::ClearValue],
        subpasses: &[&dyn Subpass],
    ) -> Result<()> {
        let subpass_infos: Vec<SubpassInfo> = subpasses
            .iter()
            .map(|subpass| SubpassInfo {
                input_attachments: subpass.input_attachments().to_vec(),
                output_attachments: subpass.output_attachments().to_vec(),
                enable_depth_stencil: subpass.enable_depth_stencil(),
            })
            .collect();

        let render_pass = self
            .cache
            .request_render_pass(render_target.attachments(), load_store_ops, &subpass_infos)?;
        let framebuffer = self.cache.request_framebuffer(render_target, &render_pass)?;

        self.begin_render_pass_resolved(&render_pass, render_target, &framebuffer, clear_values)
    }

    /// Begins a render pass whose objects were already resolved.
    pub fn begin_render_pass_resolved(
        &mut self,
        render_pass: &Arc<RenderPass>,
        render_target: &RenderTarget,
        framebuffer: &Arc<Framebuffer>,
        clear_values: &[vk::ClearValue],
    ) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(Error::InvalidState { op: "begin_render_pass" });
        }

        let begin_info = vk::RenderPassBeginInfo {
            render_pass: render_pass.handle(),
            framebuffer: framebuffer.handle(),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: render_target.extent(),
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(self.handle, &begin_info, vk::SubpassContents::INLINE)
        };

        self.render_pass_binding = Some(RenderPassBinding {
            render_pass: render_pass.clone(),
            framebuffer: framebuffer.clone(),
        });
        self.pipeline_state.set_render_pass(render_pass.clone());
        self.pipeline_state.set_subpass_index(0);
        self.resize_blend_attachments(render_pass.color_output_count(0));
        Ok(())
    }

    /// Advances to the next subpass, tracking the new subpass's color
    /// output count in the blend state. The attachment count must follow
    /// the subpass or pipeline creation against it is undefined.
    pub fn next_subpass(&mut self) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(Error::InvalidState { op: "next_subpass" });
        }
        let Some(binding) = &self.render_pass_binding else {
            return Err(Error::InvalidState { op: "next_subpass" });
        };
        let index = self.pipeline_state.subpass_index() + 1;
        let color_output_count = binding.render_pass.color_output_count(index);
        self.pipeline_state.set_subpass_index(index);
        self.resize_blend_attachments(color_output_count);
        unsafe { self.device.cmd_next_subpass(self.handle, vk::SubpassContents::INLINE) };
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(Error::InvalidState { op: "end_render_pass" });
        }
        unsafe { self.device.cmd_end_render_pass(self.handle) };
        self.render_pass_binding = None;
        Ok(())
    }

    fn resize_blend_attachments(&mut self, count: u32) {
        let mut blend_state = self.pipeline_state.color_blend().clone();
        blend_state
            .attachments
            .resize(count as usize, ColorBlendAttachmentState::default());
        self.pipeline_state.set_color_blend(blend_state);
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(self.handle, 0, &[viewport]) };
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.handle, 0, &[scissor]) };
    }

    pub fn image_memory_barrier(&self, image_view: &ImageView, barrier: &ImageMemoryBarrier) {
        let image_barrier = vk::ImageMemoryBarrier {
            src_access_mask: barrier.src_access,
            dst_access_mask: barrier.dst_access,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_queue_family_index: barrier.old_queue_family,
            dst_queue_family_index: barrier.new_queue_family,
            image: image_view.image(),
            subresource_range: image_view.subresource_range(),
            ..Default::default()
        };
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.handle,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            )
        };
    }

    pub fn set_rasterization_state(&mut self, state: RasterizationState) {
        self.pipeline_state.set_rasterization(state);
    }

    pub fn set_multisample_state(&mut self, state: MultisampleState) {
        self.pipeline_state.set_multisample(state);
    }

    pub fn set_vertex_input_state(&mut self, state: VertexInputState) {
        self.pipeline_state.set_vertex_input(state);
    }

    pub fn set_input_assembly_state(&mut self, state: InputAssemblyState) {
        self.pipeline_state.set_input_assembly(state);
    }

    pub fn set_depth_stencil_state(&mut self, state: DepthStencilState) {
        self.pipeline_state.set_depth_stencil(state);
    }

    pub fn set_color_blend_state(&mut self, state: ColorBlendState) {
        self.pipeline_state.set_color_blend(state);
    }

    pub fn bind_pipeline_layout(&mut self, layout: Arc<PipelineLayout>) {
        self.pipeline_state.set_pipeline_layout(layout);
    }

    pub fn pipeline_state(&self) -> &PipelineState {
        &self.pipeline_state
    }

    /// Buffers push-constant bytes; they reach the GPU at the next flush,
    /// with the stage mask derived from the pipeline layout.
    pub fn push_constants(&mut self, data: &[u8]) {
        self.stored_push_constants.extend_from_slice(data);
    }

    pub fn bind_buffer(
        &mut self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.binding_state
            .bind_buffer(buffer.handle(), offset, range, set, binding, array_element);
    }

    pub fn bind_image(
        &mut self,
        image_view: &ImageView,
        sampler: &crate::sampler::Sampler,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.binding_state.bind_image(
            image_view.handle(),
            image_view.format(),
            sampler.handle(),
            set,
            binding,
            array_element,
        );
    }

    pub fn bind_input(&mut self, image_view: &ImageView, set: u32, binding: u32, array_element: u32) {
        self.binding_state
            .bind_input(image_view.handle(), image_view.format(), set, binding, array_element);
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[&Buffer], offsets: &[vk::DeviceSize]) {
        let handles: Vec<_> = buffers.iter().map(|buffer| buffer.handle()).collect();
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.handle, first_binding, &handles, offsets)
        };
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.handle, buffer.handle(), offset, index_type)
        };
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.flush(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.device
                .cmd_draw(self.handle, vertex_count, instance_count, first_vertex, first_instance)
        };
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.flush(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.device.cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
        Ok(())
    }

    /// The single synchronization point before a draw: binds a pipeline if
    /// the pipeline state changed, pushes buffered push constants, and
    /// materializes descriptor sets for bindings marked dirty. A flush with
    /// nothing dirty records nothing.
    pub fn flush(&mut self, bind_point: vk::PipelineBindPoint) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(Error::InvalidState { op: "flush" });
        }
        self.flush_pipeline_state(bind_point)?;
        self.flush_push_constants()?;
        self.flush_descriptor_state(bind_point)
    }

    fn flush_pipeline_state(&mut self, bind_point: vk::PipelineBindPoint) -> Result<()> {
        if !self.pipeline_state.is_dirty() {
            return Ok(());
        }
        self.pipeline_state.clear_dirty();

        if bind_point != vk::PipelineBindPoint::GRAPHICS {
            return Err(Error::InvalidState { op: "flush_pipeline_state" });
        }
        let pipeline = self.cache.request_graphics_pipeline(&self.pipeline_state)?;
        unsafe { self.device.cmd_bind_pipeline(self.handle, bind_point, pipeline.handle()) };
        Ok(())
    }

    fn flush_push_constants(&mut self) -> Result<()> {
        if self.stored_push_constants.is_empty() {
            return Ok(());
        }
        let Some(layout) = self.pipeline_state.pipeline_layout() else {
            return Err(Error::InvalidState { op: "flush_push_constants" });
        };

        let size = self.stored_push_constants.len() as u32;
        let stages = layout.push_constant_stages(0, size);
        if stages.is_empty() {
            // No declared range covers the buffered bytes; dropping them is
            // recoverable, submitting an empty stage mask is not.
            warn!("push constant range of {size} bytes is not declared by the pipeline layout, dropping");
        } else {
            unsafe {
                self.device.cmd_push_constants(
                    self.handle,
                    layout.handle(),
                    stages,
                    0,
                    &self.stored_push_constants,
                )
            };
        }
        self.stored_push_constants.clear();
        Ok(())
    }

    fn flush_descriptor_state(&mut self, bind_point: vk::PipelineBindPoint) -> Result<()> {
        if !self.binding_state.is_dirty() {
            return Ok(());
        }
        self.binding_state.clear_dirty();

        let Some(layout) = self.pipeline_state.pipeline_layout().cloned() else {
            return Err(Error::InvalidState { op: "flush_descriptor_state" });
        };

        let dirty_sets: Vec<u32> = self
            .binding_state
            .sets()
            .iter()
            .filter(|(_, set)| set.is_dirty())
            .map(|(&index, _)| index)
            .collect();

        for set_index in dirty_sets {
            if let Some(set) = self.binding_state.sets_mut().get_mut(&set_index) {
                set.clear_dirty();
            }

            let Some(set_layout) = layout.descriptor_set_layout(set_index) else {
                warn!("pipeline layout declares no descriptor set {set_index}, skipping");
                continue;
            };

            let mut buffer_infos: BindingMap<BufferBinding> = BindingMap::default();
            let mut image_infos: BindingMap<ImageBinding> = BindingMap::default();
            let mut dynamic_offsets: Vec<u32> = vec![];

            let resource_set = &self.binding_state.sets()[&set_index];
            for (&binding_index, elements) in resource_set.bindings() {
                let Some(binding_info) = set_layout.layout_binding(binding_index) else {
                    continue;
                };
                for (&array_element, resource) in elements {
                    if let (Some(buffer), true) =
                        (resource.buffer, is_buffer_descriptor(binding_info.descriptor_type))
                    {
                        let mut info = BufferBinding {
                            buffer,
                            offset: resource.offset,
                            range: resource.range,
                        };
                        // Dynamic buffers pass their offset out-of-band.
                        if is_dynamic_buffer_descriptor(binding_info.descriptor_type) {
                            dynamic_offsets.push(info.offset as u32);
                            info.offset = 0;
                        }
                        buffer_infos.entry(binding_index).or_default().insert(array_element, info);
                    } else if resource.image_view.is_some() || resource.sampler.is_some() {
                        let image_layout = if resource.image_view.is_some() {
                            match binding_info.descriptor_type {
                                vk::DescriptorType::COMBINED_IMAGE_SAMPLER | vk::DescriptorType::SAMPLED_IMAGE => {
                                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                                }
                                vk::DescriptorType::INPUT_ATTACHMENT => {
                                    if is_depth_stencil_format(resource.image_format) {
                                        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                                    } else {
                                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                                    }
                                }
                                vk::DescriptorType::STORAGE_IMAGE => vk::ImageLayout::GENERAL,
                                _ => continue,
                            }
                        } else {
                            vk::ImageLayout::UNDEFINED
                        };
                        image_infos.entry(binding_index).or_default().insert(
                            array_element,
                            ImageBinding {
                                image_view: resource.image_view.unwrap_or(vk::ImageView::null()),
                                sampler: resource.sampler.unwrap_or(vk::Sampler::null()),
                                layout: image_layout,
                            },
                        );
                    }
                }
            }

            let descriptor_set = self.descriptors.lock().unwrap().request_descriptor_set(
                &self.device,
                set_layout,
                buffer_infos,
                image_infos,
                self.descriptor_strategy,
            )?;

            unsafe {
                self.device.cmd_bind_descriptor_sets(
                    self.handle,
                    bind_point,
                    layout.handle(),
                    set_index,
                    &[descriptor_set],
                    &dynamic_offsets,
                )
            };
        }
        Ok(())
    }
}

//! The per-window frame orchestrator: drives acquire -> record -> submit ->
//! present over N-buffered render frames and owns the resource cache.
use crate::{
    cache::ResourceCache,
    command_buffer::CommandBuffer,
    command_pool::ResetMode,
    device::Device,
    frame::RenderFrame,
    image::Image,
    queue::Queue,
    render_target::RenderTargetFactory,
    swapchain::Swapchain,
    Error, Result, vk,
};
use std::sync::Arc;
use tracing::debug;

/// Orchestrates the frame cycle for one swapchain.
///
/// At most one frame is active between [`begin`](Self::begin) and
/// [`submit`](Self::submit); once `begin` succeeds, the active frame index
/// names the render frame for the acquired swapchain image.
pub struct RenderContext {
    device: Device,
    swapchain: Swapchain,
    frames: Vec<RenderFrame>,
    queue: Queue,
    cache: Arc<ResourceCache>,
    target_factory: Box<dyn RenderTargetFactory>,
    acquired_semaphore: Option<vk::Semaphore>,
    active_frame_index: usize,
    frame_active: bool,
    thread_count: usize,
}

impl RenderContext {
    /// Builds one render frame per swapchain image, with render targets
    /// produced by the injected factory.
    pub fn new(
        device: Device,
        swapchain: Swapchain,
        target_factory: Box<dyn RenderTargetFactory>,
        thread_count: usize,
    ) -> Result<RenderContext> {
        let queue = *device.present_queue()?;
        let cache = Arc::new(ResourceCache::new(device.clone()));
        let frames = Self::build_frames(&device, &swapchain, target_factory.as_ref(), &cache, thread_count)?;

        Ok(RenderContext {
            device,
            swapchain,
            frames,
            queue,
            cache,
            target_factory,
            acquired_semaphore: None,
            active_frame_index: 0,
            frame_active: false,
            thread_count,
        })
    }

    fn build_frames(
        device: &Device,
        swapchain: &Swapchain,
        target_factory: &dyn RenderTargetFactory,
        cache: &Arc<ResourceCache>,
        thread_count: usize,
    ) -> Result<Vec<RenderFrame>> {
        swapchain
            .images()
            .iter()
            .map(|&handle| {
                let color = Image::from_swapchain(device.clone(), handle, swapchain.extent(), swapchain.format());
                let render_target = target_factory.create_render_target(color)?;
                Ok(RenderFrame::new(device.clone(), render_target, cache.clone(), thread_count))
            })
            .collect()
    }

    /// Starts a frame: reconciles the swapchain against the surface, then
    /// acquires an image, resets the frame that last used that slot, and
    /// hands out a primary command buffer on the presentation queue.
    ///
    /// An acquisition failure (`ERROR_OUT_OF_DATE_KHR`) aborts the frame and
    /// is returned to the caller; the next `begin` rebuilds the swapchain.
    pub fn begin(&mut self) -> Result<CommandBuffer> {
        if self.frame_active {
            return Err(Error::InvalidState { op: "begin" });
        }

        self.handle_surface_changes()?;

        // The acquire semaphore leaves the pool untracked; it is released
        // back after present and reclaimed at that frame's next reset.
        let acquire_semaphore = self.frames[self.active_frame_index].request_out_semaphore()?;
        let image_index = match self.swapchain.acquire_image(acquire_semaphore) {
            Ok(index) => index,
            Err(err) => {
                self.frames[self.active_frame_index].release_semaphore(acquire_semaphore);
                return Err(err);
            }
        };

        self.active_frame_index = image_index as usize;
        self.frames[self.active_frame_index].reset()?;
        self.acquired_semaphore = Some(acquire_semaphore);

        let queue = self.queue;
        let command_buffer = self.frames[self.active_frame_index].request_command_buffer(
            &queue,
            ResetMode::ResetPool,
            vk::CommandBufferLevel::PRIMARY,
            0,
        )?;
        self.frame_active = true;
        Ok(command_buffer)
    }

    /// Submits a recorded command buffer for the active frame and presents.
    ///
    /// The submission waits on the acquire semaphore at the color-attachment
    /// output stage, signals a tracked render-complete semaphore that the
    /// present waits on, and is guarded by a pooled fence so the frame's
    /// next reset knows when everything retired.
    pub fn submit(&mut self, command_buffer: CommandBuffer) -> Result<()> {
        if !self.frame_active {
            return Err(Error::InvalidState { op: "submit" });
        }
        if !command_buffer.is_executable() {
            return Err(Error::InvalidState { op: "submit" });
        }
        let wait_semaphore = self
            .acquired_semaphore
            .take()
            .ok_or(Error::InvalidState { op: "submit" })?;

        let (render_complete, fence) = {
            let frame = &mut self.frames[self.active_frame_index];
            (frame.request_semaphore()?, frame.request_fence()?)
        };

        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let command_buffer_handle = command_buffer.handle();
        let submit_info = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait_semaphore,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &command_buffer_handle,
            signal_semaphore_count: 1,
            p_signal_semaphores: &render_complete,
            ..Default::default()
        };
        let submit_result = self.queue.submit(&self.device, &[submit_info], fence);

        let present_result = submit_result.and_then(|_| {
            let image_index = self.active_frame_index as u32;
            let swapchain_handle = self.swapchain.handle();
            let present_info = vk::PresentInfoKHR {
                wait_semaphore_count: 1,
                p_wait_semaphores: &render_complete,
                swapchain_count: 1,
                p_swapchains: &swapchain_handle,
                p_image_indices: &image_index,
                ..Default::default()
            };
            self.queue.present(&self.device, &present_info).map(|_suboptimal| ())
        });

        // The acquire semaphore's last GPU use is bounded by this frame's
        // fence, so it can rejoin the pool at the frame's next reset.
        self.frames[self.active_frame_index].release_semaphore(wait_semaphore);
        self.frame_active = false;
        present_result
    }

    /// Rebuilds the swapchain and the frames' render targets when the
    /// surface extent no longer matches.
    fn handle_surface_changes(&mut self) -> Result<()> {
        let capabilities = unsafe {
            self.device
                .inner
                .vk_khr_surface
                .get_physical_device_surface_capabilities(self.device.physical_device(), self.swapchain.surface())?
        };

        let current = capabilities.current_extent;
        // The surface either has no fixed extent or is minimized; nothing to
        // reconcile in either case.
        if current.width == u32::MAX || current.width == 0 || current.height == 0 {
            return Ok(());
        }
        let extent = self.swapchain.extent();
        if current.width == extent.width && current.height == extent.height {
            return Ok(());
        }

        debug!(
            "surface extent changed {}x{} -> {}x{}, rebuilding swapchain",
            extent.width, extent.height, current.width, current.height
        );
        self.device.wait_idle()?;
        // Framebuffers reference the old image views; render passes and
        // pipelines are format-keyed and survive.
        self.cache.clear_framebuffers();

        let new_swapchain = Swapchain::recreate(&self.swapchain, current)?;
        let old_swapchain = std::mem::replace(&mut self.swapchain, new_swapchain);
        drop(old_swapchain);

        if self.swapchain.images().len() == self.frames.len() {
            // Same slot count: swap fresh render targets into the existing
            // frames, keeping their pools warm.
            for (frame, &handle) in self.frames.iter_mut().zip(self.swapchain.images()) {
                let color = Image::from_swapchain(
                    self.device.clone(),
                    handle,
                    self.swapchain.extent(),
                    self.swapchain.format(),
                );
                let render_target = self.target_factory.create_render_target(color)?;
                frame.update_render_target(render_target);
            }
        } else {
            self.frames = Self::build_frames(
                &self.device,
                &self.swapchain,
                self.target_factory.as_ref(),
                &self.cache,
                self.thread_count,
            )?;
        }
        self.active_frame_index = 0;
        Ok(())
    }

    pub fn resource_cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn frames(&self) -> &[RenderFrame] {
        &self.frames
    }

    pub fn active_frame_index(&self) -> usize {
        self.active_frame_index
    }

    pub fn is_frame_active(&self) -> bool {
        self.frame_active
    }

    pub fn active_frame(&self) -> &RenderFrame {
        &self.frames[self.active_frame_index]
    }

    pub fn active_frame_mut(&mut self) -> &mut RenderFrame {
        &mut self.frames[self.active_frame_index]
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.cache.clear();
    }
}

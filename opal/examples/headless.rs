//! Drives the frame machinery without a window: three buffered frames, a
//! two-subpass render pipeline, and the pooled sync/command state recycled
//! across a handful of simulated frames.
use std::sync::Arc;

use opal::{
    init, vk, CommandBuffer, Image, LoadStoreOp, MemoryLocation, RenderFrame, RenderPipeline, RenderTarget,
    ResetMode, ResourceCache, Result, Subpass,
};
use tracing::info;

struct ClearSubpass;

impl Subpass for ClearSubpass {
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

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (entry, instance) = unsafe { init::create_instance("opal-headless", &[])? };
    let device = unsafe { init::create_device(&entry, &instance, None)? };
    let queue = *device.graphics_queue()?;
    let family = queue.family_index();
    let cache = Arc::new(ResourceCache::new(device.clone()));

    let extent = vk::Extent2D { width: 1280, height: 720 };
    let mut frames: Vec<RenderFrame> = (0..3)
        .map(|_| -> Result<RenderFrame> {
            let color = Image::new(
                device.clone(),
                extent,
                vk::Format::B8G8R8A8_UNORM,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                MemoryLocation::GpuOnly,
            )?;
            Ok(RenderFrame::new(
                device.clone(),
                RenderTarget::new(vec![color])?,
                cache.clone(),
                1,
            ))
        })
        .collect::<Result<_>>()?;

    let mut pipeline = RenderPipeline::new();
    pipeline.set_load_store_ops(vec![LoadStoreOp::default()]);
    pipeline.set_clear_values(vec![vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.1, 0.1, 0.2, 1.0],
        },
    }]);
    pipeline.add_subpass(Box::new(ClearSubpass), &cache)?;
    pipeline.add_subpass(Box::new(ClearSubpass), &cache)?;

    for cycle in 0..9 {
        let frame = &mut frames[cycle % 3];
        frame.reset()?;

        let mut cb = frame.request_command_buffer(&queue, ResetMode::ResetPool, vk::CommandBufferLevel::PRIMARY, 0)?;
        cb.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        pipeline.draw(&mut cb, frame.render_target())?;
        cb.end()?;

        let fence = frame.request_fence()?;
        let handle = cb.handle();
        let submit_info = vk::SubmitInfo {
            command_buffer_count: 1,
            p_command_buffers: &handle,
            ..Default::default()
        };
        queue.submit(&device, &[submit_info], fence)?;

        info!(
            cycle,
            command_buffers = frame.command_buffer_count(family, 0, vk::CommandBufferLevel::PRIMARY),
            fences = frame.fence_pool().fence_count(),
            render_passes = cache.render_pass_count(),
            framebuffers = cache.framebuffer_count(),
            "frame submitted"
        );
    }

    device.wait_idle()?;
    for frame in &mut frames {
        frame.reset()?;
    }
    info!("steady state: one pooled command buffer and fence per frame in flight");
    Ok(())
}

//! A headless render loop: three buffered frames cycled ten times, with
//! pooled state expected to stop growing once every slot has been used.
mod common;

use opal::{
    vk, CommandBuffer, Image, LoadStoreOp, MemoryLocation, RenderFrame, RenderPipeline, RenderTarget, ResetMode,
    ResourceCache, Result, Subpass,
};
use std::sync::Arc;

struct NoopSubpass;

impl Subpass for NoopSubpass {
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
fn ten_cycles_over_three_frames_reach_steady_state() {
    let Some(device) = common::test_device() else { return };
    let queue = *device.graphics_queue().unwrap();
    let family = queue.family_index();
    let cache = Arc::new(ResourceCache::new(device.clone()));

    let mut frames: Vec<RenderFrame> = (0..3)
        .map(|_| {
            let color = Image::new(
                device.clone(),
                vk::Extent2D { width: 64, height: 64 },
                vk::Format::B8G8R8A8_UNORM,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                MemoryLocation::GpuOnly,
            )
            .unwrap();
            RenderFrame::new(device.clone(), RenderTarget::new(vec![color]).unwrap(), cache.clone(), 1)
        })
        .collect();

    // Two subpasses over the single color attachment exercise the
    // next-subpass path as well.
    let mut pipeline = RenderPipeline::new();
    pipeline.set_load_store_ops(vec![LoadStoreOp::default()]);
    pipeline.set_clear_values(vec![vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    }]);
    pipeline.add_subpass(Box::new(NoopSubpass), &cache).unwrap();
    pipeline.add_subpass(Box::new(NoopSubpass), &cache).unwrap();

    for cycle in 0..10 {
        let frame = &mut frames[cycle % 3];
        frame.reset().unwrap();

        let mut cb = frame
            .request_command_buffer(&queue, ResetMode::ResetPool, vk::CommandBufferLevel::PRIMARY, 0)
            .unwrap();
        cb.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        pipeline.draw(&mut cb, frame.render_target()).unwrap();
        cb.end().unwrap();

        // Pool an out semaphore the way the acquire path would, without
        // attaching it to the submission.
        let out = frame.request_out_semaphore().unwrap();
        frame.release_semaphore(out);

        let fence = frame.request_fence().unwrap();
        let handle = cb.handle();
        let submit_info = vk::SubmitInfo {
            command_buffer_count: 1,
            p_command_buffers: &handle,
            ..Default::default()
        };
        queue.submit(&device, &[submit_info], fence).unwrap();
    }

    device.wait_idle().unwrap();
    for frame in &mut frames {
        frame.reset().unwrap();
    }

    // One command buffer, fence and semaphore per frame in flight; no growth
    // past the first use of each slot.
    for frame in &frames {
        assert_eq!(frame.command_buffer_count(family, 0, vk::CommandBufferLevel::PRIMARY), 1);
        assert_eq!(frame.fence_pool().fence_count(), 1);
        assert_eq!(frame.semaphore_pool().semaphore_count(), 1);
    }

    // One render pass shape, one framebuffer per distinct render target.
    assert_eq!(cache.render_pass_count(), 1);
    assert_eq!(cache.framebuffer_count(), 3);
    assert_eq!(cache.graphics_pipeline_count(), 0, "no draw state was ever flushed");
}

//! Pool bookkeeping invariants that need a real device.
mod common;

use opal::{
    vk, CommandPool, DescriptorSetStrategy, FencePool, RenderFrame, RenderTarget, ResetMode, ResourceCache,
    SemaphorePool, ShaderResource, ShaderResourceMode, ShaderResourceType,
};
use std::{collections::BTreeMap, sync::Arc};

#[test]
fn fence_pool_rewinds_to_zero_and_recycles() {
    let Some(device) = common::test_device() else { return };
    let queue = *device.graphics_queue().unwrap();

    let mut pool = FencePool::new(device.clone());
    assert!(pool.wait(0).is_ok(), "waiting with no active fences is a no-op");

    let first = pool.request_fence().unwrap();
    let second = pool.request_fence().unwrap();
    assert_eq!(pool.active_count(), 2);
    assert_eq!(pool.fence_count(), 2);

    // An empty submission signals the fence once prior work (none) retires.
    queue.submit(&device, &[], first).unwrap();
    queue.submit(&device, &[], second).unwrap();
    pool.wait(u64::MAX).unwrap();
    pool.reset().unwrap();
    assert_eq!(pool.active_count(), 0);

    // The next request reuses a pooled fence instead of growing the store.
    let recycled = pool.request_fence().unwrap();
    assert_eq!(recycled, first);
    assert_eq!(pool.fence_count(), 2);
}

#[test]
fn semaphore_pool_reclaims_released_semaphores_on_reset() {
    let Some(device) = common::test_device() else { return };

    let mut pool = SemaphorePool::new(device.clone());
    let _tracked = pool.request_semaphore().unwrap();
    let out = pool.request_out_semaphore().unwrap();
    assert_eq!(pool.active_count(), 1, "out semaphores are not tracked");
    assert_eq!(pool.semaphore_count(), 1);

    // Releasing defers; the semaphore only rejoins the pool at reset.
    pool.release_semaphore(out);
    assert_eq!(pool.semaphore_count(), 1);
    pool.reset();
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.semaphore_count(), 2);

    // Steady state: request/release cycles stop growing the pool.
    for _ in 0..10 {
        let _tracked = pool.request_semaphore().unwrap();
        let out = pool.request_out_semaphore().unwrap();
        pool.release_semaphore(out);
        pool.reset();
    }
    assert_eq!(pool.semaphore_count(), 2);
}

#[test]
fn command_pool_prefers_inactive_buffers_over_allocation() {
    let Some(device) = common::test_device() else { return };
    let family = device.graphics_queue().unwrap().family_index();

    let mut pool = CommandPool::new(device.clone(), family, ResetMode::ResetPool, 0).unwrap();
    let first = pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap();
    let _second = pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap();
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::PRIMARY), 2);

    pool.reset_pool().unwrap();
    let reused = pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap();
    assert_eq!(reused, first);
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::PRIMARY), 2);

    // Secondary buffers pool independently of primaries.
    let _secondary = pool.request_command_buffer(vk::CommandBufferLevel::SECONDARY).unwrap();
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::SECONDARY), 1);
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::PRIMARY), 2);
}

#[test]
fn reset_modes_have_distinct_reclamation_semantics() {
    let Some(device) = common::test_device() else { return };
    let family = device.graphics_queue().unwrap().family_index();

    // AlwaysAllocate drops every buffer so each request allocates fresh.
    let mut pool = CommandPool::new(device.clone(), family, ResetMode::AlwaysAllocate, 0).unwrap();
    pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap();
    pool.reset_pool().unwrap();
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::PRIMARY), 0);
    pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap();
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::PRIMARY), 1);

    // ResetIndividually keeps the buffers and rewinds the watermark.
    let mut pool = CommandPool::new(device.clone(), family, ResetMode::ResetIndividually, 0).unwrap();
    let first = pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap();
    pool.reset_pool().unwrap();
    assert_eq!(pool.buffer_count(vk::CommandBufferLevel::PRIMARY), 1);
    assert_eq!(pool.request_command_buffer(vk::CommandBufferLevel::PRIMARY).unwrap(), first);
}

#[test]
fn command_buffer_enforces_its_state_machine() {
    let Some(device) = common::test_device() else { return };
    let queue = *device.graphics_queue().unwrap();
    let cache = Arc::new(ResourceCache::new(device.clone()));
    let target = RenderTarget::new(vec![]).unwrap();
    let mut frame = RenderFrame::new(device.clone(), target, cache.clone(), 1);

    assert!(
        frame
            .request_command_buffer(&queue, ResetMode::ResetPool, vk::CommandBufferLevel::PRIMARY, 1)
            .is_err(),
        "thread index past the frame's thread count is rejected"
    );

    let mut cb = frame
        .request_command_buffer(&queue, ResetMode::ResetPool, vk::CommandBufferLevel::PRIMARY, 0)
        .unwrap();

    assert!(cb.end().is_err(), "end before begin");
    assert!(cb.flush(vk::PipelineBindPoint::GRAPHICS).is_err(), "flush before begin");

    cb.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
    assert!(cb.is_recording());
    assert!(cb.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).is_err(), "begin twice");

    // Nothing is dirty, so the flush records nothing and resolves nothing.
    cb.flush(vk::PipelineBindPoint::GRAPHICS).unwrap();
    assert_eq!(cache.graphics_pipeline_count(), 0);

    cb.end().unwrap();
    assert!(cb.is_executable());
    assert!(cb.end().is_err(), "end twice");
}

#[test]
fn frame_descriptor_strategies_cache_or_allocate() {
    let Some(device) = common::test_device() else { return };
    let cache = Arc::new(ResourceCache::new(device.clone()));
    let target = RenderTarget::new(vec![]).unwrap();
    let mut frame = RenderFrame::new(device.clone(), target, cache.clone(), 1);

    let resources = [ShaderResource {
        name: "ubo".into(),
        stages: vk::ShaderStageFlags::VERTEX,
        ty: ShaderResourceType::BufferUniform,
        mode: ShaderResourceMode::Static,
        set: 0,
        binding: 0,
        ..Default::default()
    }];
    let layout = cache.request_descriptor_set_layout(0, &[], &resources).unwrap();

    let buffer = opal::Buffer::new(
        device.clone(),
        256,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        opal::MemoryLocation::CpuToGpu,
    )
    .unwrap();
    let mut buffers: opal::BindingMap<opal::BufferBinding> = BTreeMap::new();
    buffers.entry(0).or_default().insert(
        0,
        opal::BufferBinding {
            buffer: buffer.handle(),
            offset: 0,
            range: 256,
        },
    );

    // StoreInCache returns the same set for the same binding content.
    let first = frame
        .request_descriptor_set(&layout, buffers.clone(), BTreeMap::new(), 0)
        .unwrap();
    let second = frame
        .request_descriptor_set(&layout, buffers.clone(), BTreeMap::new(), 0)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(frame.descriptor_set_count(0), 1);

    // CreateDirectly always allocates an ephemeral set.
    frame.set_descriptor_strategy(DescriptorSetStrategy::CreateDirectly);
    let third = frame
        .request_descriptor_set(&layout, buffers, BTreeMap::new(), 0)
        .unwrap();
    assert_ne!(third, first);
    assert_eq!(frame.descriptor_set_count(0), 1);
}

//! Idempotent-materialization properties of the resource cache.
mod common;

use opal::{
    vk, Attachment, Buffer, BufferBinding, DescriptorPool, DescriptorSet, Error, LoadStoreOp, MemoryLocation,
    RenderTarget, ResourceCache, ShaderResource, ShaderResourceMode, ShaderResourceType, ShaderSource,
    ShaderVariant, SubpassInfo,
};
use std::{collections::BTreeMap, sync::Arc};

fn color_attachment() -> Attachment {
    Attachment {
        format: vk::Format::B8G8R8A8_UNORM,
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ..Default::default()
    }
}

fn uniform_resource(binding: u32, mode: ShaderResourceMode) -> ShaderResource {
    ShaderResource {
        name: format!("buffer_{binding}"),
        stages: vk::ShaderStageFlags::VERTEX,
        ty: ShaderResourceType::BufferUniform,
        mode,
        set: 0,
        binding,
        ..Default::default()
    }
}

#[test]
fn render_pass_materialization_is_idempotent() {
    let Some(device) = common::test_device() else { return };
    let cache = ResourceCache::new(device);

    let attachments = [color_attachment()];
    let ops = [LoadStoreOp::default()];
    let subpasses = [SubpassInfo {
        input_attachments: vec![],
        output_attachments: vec![0],
        enable_depth_stencil: false,
    }];

    let first = cache.request_render_pass(&attachments, &ops, &subpasses).unwrap();
    let second = cache.request_render_pass(&attachments, &ops, &subpasses).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.render_pass_count(), 1);

    // A different load op is a different render pass.
    let other_ops = [LoadStoreOp {
        load_op: vk::AttachmentLoadOp::LOAD,
        store_op: vk::AttachmentStoreOp::STORE,
    }];
    let third = cache.request_render_pass(&attachments, &other_ops, &subpasses).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(cache.render_pass_count(), 2);
}

#[test]
fn clearing_framebuffers_leaves_render_passes_intact() {
    let Some(device) = common::test_device() else { return };
    let cache = ResourceCache::new(device.clone());

    let image = opal::Image::new(
        device,
        vk::Extent2D { width: 64, height: 64 },
        vk::Format::B8G8R8A8_UNORM,
        vk::ImageUsageFlags::COLOR_ATTACHMENT,
        MemoryLocation::GpuOnly,
    )
    .unwrap();
    let target = RenderTarget::new(vec![image]).unwrap();

    let render_pass = cache
        .request_render_pass(target.attachments(), &[LoadStoreOp::default()], &[])
        .unwrap();
    let first = cache.request_framebuffer(&target, &render_pass).unwrap();
    let again = cache.request_framebuffer(&target, &render_pass).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(cache.framebuffer_count(), 1);

    // The swapchain-resize path: framebuffers go, format-keyed objects stay.
    cache.clear_framebuffers();
    assert_eq!(cache.framebuffer_count(), 0);
    assert_eq!(cache.render_pass_count(), 1);

    let rebuilt = cache.request_framebuffer(&target, &render_pass).unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
}

#[test]
fn pipeline_layouts_deduplicate_and_merge_reflection() {
    let Some(device) = common::test_device() else { return };
    let cache = ResourceCache::new(device);

    let vertex_source = ShaderSource::new(
        vec![0x0723_0203, 1],
        vec![
            uniform_resource(0, ShaderResourceMode::Static),
            ShaderResource {
                name: "camera".into(),
                stages: vk::ShaderStageFlags::VERTEX,
                ty: ShaderResourceType::PushConstant,
                mode: ShaderResourceMode::Static,
                offset: 0,
                size: 64,
                ..Default::default()
            },
        ],
    );
    let fragment_source = ShaderSource::new(
        vec![0x0723_0203, 2],
        vec![ShaderResource {
            name: "base_color".into(),
            stages: vk::ShaderStageFlags::FRAGMENT,
            ty: ShaderResourceType::ImageSampler,
            mode: ShaderResourceMode::Static,
            set: 0,
            binding: 1,
            ..Default::default()
        }],
    );

    let variant = ShaderVariant::default();
    let vertex = cache
        .request_shader_module(vk::ShaderStageFlags::VERTEX, &vertex_source, &variant)
        .unwrap();
    let fragment = cache
        .request_shader_module(vk::ShaderStageFlags::FRAGMENT, &fragment_source, &variant)
        .unwrap();

    let layout = cache
        .request_pipeline_layout(vec![vertex.clone(), fragment.clone()])
        .unwrap();
    let again = cache.request_pipeline_layout(vec![vertex, fragment]).unwrap();
    assert!(Arc::ptr_eq(&layout, &again));
    assert_eq!(cache.pipeline_layout_count(), 1);
    assert_eq!(cache.descriptor_set_layout_count(), 1);

    let set_layout = layout.descriptor_set_layout(0).expect("set 0 exists");
    assert!(set_layout.layout_binding(0).is_some());
    assert!(set_layout.layout_binding(1).is_some());

    // The push range covers the vertex stage only, and an undeclared range
    // covers nothing.
    assert_eq!(layout.push_constant_stages(0, 64), vk::ShaderStageFlags::VERTEX);
    assert_eq!(layout.push_constant_stages(0, 128), vk::ShaderStageFlags::empty());
}

#[test]
fn mixed_binding_modes_are_rejected_at_layout_construction() {
    let Some(device) = common::test_device() else { return };
    let cache = ResourceCache::new(device);

    let resources = [
        uniform_resource(0, ShaderResourceMode::Dynamic),
        ShaderResource {
            name: "bindless".into(),
            stages: vk::ShaderStageFlags::FRAGMENT,
            ty: ShaderResourceType::ImageSampler,
            mode: ShaderResourceMode::UpdateAfterBind,
            set: 0,
            binding: 1,
            ..Default::default()
        },
    ];
    let result = cache.request_descriptor_set_layout(0, &[], &resources);
    assert!(matches!(result, Err(Error::MixedBindingModes)));
}

#[test]
fn descriptor_pool_extends_a_chain_of_fixed_capacity_pools() {
    let Some(device) = common::test_device() else { return };
    let cache = ResourceCache::new(device.clone());

    let resources = [uniform_resource(0, ShaderResourceMode::Static)];
    let layout = cache.request_descriptor_set_layout(0, &[], &resources).unwrap();

    let mut pool = DescriptorPool::new(device, &layout, 2);
    for _ in 0..5 {
        pool.allocate().unwrap();
    }
    assert_eq!(pool.pool_count(), 3);
}

#[test]
fn descriptor_set_update_reissues_only_changed_writes() {
    let Some(device) = common::test_device() else { return };
    let cache = ResourceCache::new(device.clone());

    let resources = [uniform_resource(0, ShaderResourceMode::Static)];
    let layout = cache.request_descriptor_set_layout(0, &[], &resources).unwrap();
    let mut pool = DescriptorPool::new(device.clone(), &layout, 4);

    let buffer = Buffer::new(
        device.clone(),
        256,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
    )
    .unwrap();
    let mut buffers: opal::BindingMap<BufferBinding> = BTreeMap::new();
    buffers.entry(0).or_default().insert(
        0,
        BufferBinding {
            buffer: buffer.handle(),
            offset: 0,
            range: 256,
        },
    );

    let mut set = DescriptorSet::new(device, &layout, &mut pool, buffers, BTreeMap::new()).unwrap();
    assert_eq!(set.update(&[]), 1);
    assert_eq!(set.update(&[]), 0, "unchanged content issues no writes");

    // Shrinking the bound range changes the content of exactly one write.
    set.set_buffer_binding(
        0,
        0,
        BufferBinding {
            buffer: buffer.handle(),
            offset: 0,
            range: 128,
        },
    );
    assert_eq!(set.update(&[]), 1);
    assert_eq!(set.update(&[]), 0);
}

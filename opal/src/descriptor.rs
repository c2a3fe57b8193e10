//! Descriptor set layouts, backing pools and write-batched descriptor sets.
use crate::{
    binding_state::BindingMap,
    device::Device,
    shader::{ShaderResource, ShaderResourceMode, ShaderResourceType},
    Error, Result, vk,
};
use fxhash::FxHashMap;
use std::os::raw::c_void;
use tracing::warn;

pub(crate) fn is_dynamic_buffer_descriptor(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

pub(crate) fn is_buffer_descriptor(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::STORAGE_BUFFER
    ) || is_dynamic_buffer_descriptor(descriptor_type)
}

fn descriptor_type_for(ty: ShaderResourceType, dynamic: bool) -> Result<vk::DescriptorType> {
    let descriptor_type = match ty {
        ShaderResourceType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        ShaderResourceType::Image => vk::DescriptorType::SAMPLED_IMAGE,
        ShaderResourceType::ImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ShaderResourceType::ImageStorage => vk::DescriptorType::STORAGE_IMAGE,
        ShaderResourceType::Sampler => vk::DescriptorType::SAMPLER,
        ShaderResourceType::BufferUniform if dynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        ShaderResourceType::BufferUniform => vk::DescriptorType::UNIFORM_BUFFER,
        ShaderResourceType::BufferStorage if dynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        ShaderResourceType::BufferStorage => vk::DescriptorType::STORAGE_BUFFER,
        other => return Err(Error::UnsupportedShaderResource(other)),
    };
    Ok(descriptor_type)
}

/// One binding of a descriptor set layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stages: vk::ShaderStageFlags,
    pub flags: vk::DescriptorBindingFlags,
}

/// An immutable descriptor set layout built from shader reflection records.
pub struct DescriptorSetLayout {
    device: Device,
    handle: vk::DescriptorSetLayout,
    set_index: u32,
    bindings: FxHashMap<u32, LayoutBinding>,
}

impl DescriptorSetLayout {
    pub(crate) fn new(device: &Device, set_index: u32, shader_resources: &[ShaderResource]) -> Result<DescriptorSetLayout> {
        let mut bindings = vec![];
        let mut binding_flags = vec![];
        let mut lookup = FxHashMap::default();

        let mut any_update_after_bind = false;
        let mut any_dynamic = false;

        for resource in shader_resources {
            // Only resources with a binding point contribute.
            if matches!(
                resource.ty,
                ShaderResourceType::Input
                    | ShaderResourceType::Output
                    | ShaderResourceType::PushConstant
                    | ShaderResourceType::SpecializationConstant
            ) {
                continue;
            }

            let descriptor_type = descriptor_type_for(resource.ty, resource.mode == ShaderResourceMode::Dynamic)?;
            let flags = if resource.mode == ShaderResourceMode::UpdateAfterBind {
                any_update_after_bind = true;
                vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            } else {
                vk::DescriptorBindingFlags::empty()
            };
            any_dynamic |= resource.mode == ShaderResourceMode::Dynamic;

            bindings.push(vk::DescriptorSetLayoutBinding {
                binding: resource.binding,
                descriptor_type,
                descriptor_count: resource.array_size,
                stage_flags: resource.stages,
                ..Default::default()
            });
            binding_flags.push(flags);
            lookup.insert(
                resource.binding,
                LayoutBinding {
                    binding: resource.binding,
                    descriptor_type,
                    descriptor_count: resource.array_size,
                    stages: resource.stages,
                    flags,
                },
            );
        }

        // Update-after-bind pools cannot also serve dynamic resources.
        if any_update_after_bind && any_dynamic {
            return Err(Error::MixedBindingModes);
        }

        let mut flags_create_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo {
            binding_count: binding_flags.len() as u32,
            p_binding_flags: binding_flags.as_ptr(),
            ..Default::default()
        };

        let mut create_info = vk::DescriptorSetLayoutCreateInfo {
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        if any_update_after_bind {
            create_info.flags |= vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL;
            create_info.p_next = &mut flags_create_info as *mut _ as *const c_void;
        }

        let handle = unsafe { device.create_descriptor_set_layout(&create_info, None)? };
        Ok(DescriptorSetLayout {
            device: device.clone(),
            handle,
            set_index,
            bindings: lookup,
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    pub fn layout_binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.get(&binding)
    }

    pub(crate) fn bindings(&self) -> &FxHashMap<u32, LayoutBinding> {
        &self.bindings
    }

    pub fn needs_update_after_bind(&self) -> bool {
        self.bindings
            .values()
            .any(|b| b.flags.contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND))
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_set_layout(self.handle, None) };
    }
}

/// Sets allocated from each backing `VkDescriptorPool` before the next one
/// is opened. The underlying API cannot grow a pool in place, so exhaustion
/// extends a chain of fixed-capacity pools instead.
pub const MAX_SETS_PER_POOL: u32 = 16;

/// Allocates descriptor sets for one layout from a chain of fixed-capacity
/// pools.
pub struct DescriptorPool {
    device: Device,
    layout: vk::DescriptorSetLayout,
    update_after_bind: bool,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    pool_max_sets: u32,
    pools: Vec<vk::DescriptorPool>,
    pool_set_counts: Vec<u32>,
    pool_index: usize,
}

impl DescriptorPool {
    pub fn new(device: Device, layout: &DescriptorSetLayout, pool_max_sets: u32) -> DescriptorPool {
        let mut counts: FxHashMap<vk::DescriptorType, u32> = FxHashMap::default();
        for binding in layout.bindings().values() {
            *counts.entry(binding.descriptor_type).or_insert(0) += binding.descriptor_count;
        }
        let pool_sizes = counts
            .into_iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: descriptor_count * pool_max_sets,
            })
            .collect();

        DescriptorPool {
            device,
            layout: layout.handle(),
            update_after_bind: layout.needs_update_after_bind(),
            pool_sizes,
            pool_max_sets,
            pools: vec![],
            pool_set_counts: vec![],
            pool_index: 0,
        }
    }

    /// Allocates one set, opening a new backing pool when the current chain
    /// is exhausted.
    pub fn allocate(&mut self) -> Result<vk::DescriptorSet> {
        self.pool_index = self.find_available_pool(self.pool_index)?;
        self.pool_set_counts[self.pool_index] += 1;

        let set_layout = self.layout;
        let allocate_info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: self.pools[self.pool_index],
            descriptor_set_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        match unsafe { self.device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => Ok(sets[0]),
            Err(err) => {
                self.pool_set_counts[self.pool_index] -= 1;
                Err(err.into())
            }
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn find_available_pool(&mut self, index: usize) -> Result<usize> {
        let mut index = index;
        loop {
            if index >= self.pools.len() {
                let mut create_info = vk::DescriptorPoolCreateInfo {
                    max_sets: self.pool_max_sets,
                    pool_size_count: self.pool_sizes.len() as u32,
                    p_pool_sizes: self.pool_sizes.as_ptr(),
                    ..Default::default()
                };
                if self.update_after_bind {
                    create_info.flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
                }
                let handle = unsafe { self.device.create_descriptor_pool(&create_info, None)? };
                self.pools.push(handle);
                self.pool_set_counts.push(0);
                return Ok(index);
            }
            if self.pool_set_counts[index] < self.pool_max_sets {
                return Ok(index);
            }
            index += 1;
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        for pool in self.pools.drain(..) {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
    }
}

/// The buffer half of one descriptor write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferBinding {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

/// The image half of one descriptor write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageBinding {
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum WriteInfo {
    Buffer(BufferBinding),
    Image(ImageBinding),
}

/// One deferred descriptor write, hashable so re-submission of identical
/// content can be skipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WriteOp {
    pub(crate) binding: u32,
    pub(crate) array_element: u32,
    pub(crate) descriptor_type: vk::DescriptorType,
    pub(crate) info: WriteInfo,
}

/// Clamps a buffer descriptor range to the device limit for its type.
/// Returns the usable range and whether clipping occurred.
pub(crate) fn clip_buffer_range(
    descriptor_type: vk::DescriptorType,
    range: vk::DeviceSize,
    limits: &vk::PhysicalDeviceLimits,
) -> (vk::DeviceSize, bool) {
    let limit = match descriptor_type {
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
            limits.max_uniform_buffer_range as vk::DeviceSize
        }
        vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
            limits.max_storage_buffer_range as vk::DeviceSize
        }
        _ => return (range, false),
    };
    if range > limit {
        (limit, true)
    } else {
        (range, false)
    }
}

/// Builds the deferred write list for one set, dropping bindings the layout
/// does not declare and clipping over-large buffer ranges (with a warning;
/// an oversized range is a recoverable authoring mistake, not an error).
pub(crate) fn build_write_ops(
    bindings: &FxHashMap<u32, LayoutBinding>,
    set_index: u32,
    buffer_infos: &BindingMap<BufferBinding>,
    image_infos: &BindingMap<ImageBinding>,
    limits: &vk::PhysicalDeviceLimits,
) -> Vec<WriteOp> {
    let mut writes = vec![];

    for (&binding, elements) in buffer_infos {
        let Some(layout_binding) = bindings.get(&binding) else {
            continue;
        };
        for (&array_element, info) in elements {
            let (range, clipped) = clip_buffer_range(layout_binding.descriptor_type, info.range, limits);
            if clipped {
                warn!(
                    "set {set_index} binding {binding}: buffer range {} exceeds the device limit, clipping to {range}",
                    info.range
                );
            }
            writes.push(WriteOp {
                binding,
                array_element,
                descriptor_type: layout_binding.descriptor_type,
                info: WriteInfo::Buffer(BufferBinding { range, ..*info }),
            });
        }
    }

    for (&binding, elements) in image_infos {
        let Some(layout_binding) = bindings.get(&binding) else {
            continue;
        };
        for (&array_element, info) in elements {
            writes.push(WriteOp {
                binding,
                array_element,
                descriptor_type: layout_binding.descriptor_type,
                info: WriteInfo::Image(*info),
            });
        }
    }

    writes
}

/// Filters `writes` down to those whose content differs from the version
/// last applied, optionally restricted to `bindings_to_update`.
pub(crate) fn pending_writes(
    writes: &[WriteOp],
    applied: &FxHashMap<(u32, u32), u64>,
    bindings_to_update: &[u32],
) -> Vec<(WriteOp, u64)> {
    writes
        .iter()
        .filter(|op| bindings_to_update.is_empty() || bindings_to_update.contains(&op.binding))
        .filter_map(|op| {
            let hash = fxhash::hash64(op);
            match applied.get(&(op.binding, op.array_element)) {
                Some(&last) if last == hash => None,
                _ => Some((*op, hash)),
            }
        })
        .collect()
}

/// A descriptor set prepared once from buffer/image binding maps, then kept
/// up to date through [`update`](Self::update), which reissues only writes
/// whose content changed since they were last applied.
pub struct DescriptorSet {
    device: Device,
    layout: vk::DescriptorSetLayout,
    // The handle is owned by the pool and lives until the pool is destroyed.
    handle: vk::DescriptorSet,
    buffer_infos: BindingMap<BufferBinding>,
    image_infos: BindingMap<ImageBinding>,
    writes: Vec<WriteOp>,
    applied: FxHashMap<(u32, u32), u64>,
}

impl DescriptorSet {
    pub fn new(
        device: Device,
        layout: &DescriptorSetLayout,
        pool: &mut DescriptorPool,
        buffer_infos: BindingMap<BufferBinding>,
        image_infos: BindingMap<ImageBinding>,
    ) -> Result<DescriptorSet> {
        let handle = pool.allocate()?;
        let mut set = DescriptorSet {
            device,
            layout: layout.handle(),
            handle,
            buffer_infos,
            image_infos,
            writes: vec![],
            applied: FxHashMap::default(),
        };
        set.prepare(layout);
        Ok(set)
    }

    /// Builds the deferred write list. Preparing twice is rejected: the
    /// write list is derived state and must not be rebuilt behind the
    /// applied-hash bookkeeping.
    fn prepare(&mut self, layout: &DescriptorSetLayout) {
        if !self.writes.is_empty() {
            warn!("descriptor set already prepared, skipping");
            return;
        }
        let limits = *self.device.limits();
        self.writes = build_write_ops(
            layout.bindings(),
            layout.set_index(),
            &self.buffer_infos,
            &self.image_infos,
            &limits,
        );
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Replaces the buffer bound at `(binding, array_element)`; the next
    /// [`update`](Self::update) reissues exactly that write.
    pub fn set_buffer_binding(&mut self, binding: u32, array_element: u32, info: BufferBinding) {
        self.buffer_infos.entry(binding).or_default().insert(array_element, info);
        let limits = *self.device.limits();
        if let Some(op) = self
            .writes
            .iter_mut()
            .find(|op| op.binding == binding && op.array_element == array_element && matches!(op.info, WriteInfo::Buffer(_)))
        {
            let (range, clipped) = clip_buffer_range(op.descriptor_type, info.range, &limits);
            if clipped {
                warn!(
                    "binding {binding}: buffer range {} exceeds the device limit, clipping to {range}",
                    info.range
                );
            }
            op.info = WriteInfo::Buffer(BufferBinding { range, ..info });
        }
    }

    /// Replaces the image bound at `(binding, array_element)`.
    pub fn set_image_binding(&mut self, binding: u32, array_element: u32, info: ImageBinding) {
        self.image_infos.entry(binding).or_default().insert(array_element, info);
        if let Some(op) = self
            .writes
            .iter_mut()
            .find(|op| op.binding == binding && op.array_element == array_element && matches!(op.info, WriteInfo::Image(_)))
        {
            op.info = WriteInfo::Image(info);
        }
    }

    /// Applies the writes whose content changed since they were last
    /// applied. An empty `bindings_to_update` considers every binding.
    /// Returns the number of writes submitted to the device.
    pub fn update(&mut self, bindings_to_update: &[u32]) -> usize {
        let pending = pending_writes(&self.writes, &self.applied, bindings_to_update);
        if pending.is_empty() {
            return 0;
        }
        self.submit(pending.iter().map(|(op, _)| *op));
        let count = pending.len();
        for (op, hash) in pending {
            self.applied.insert((op.binding, op.array_element), hash);
        }
        count
    }

    /// Applies every write unconditionally. Used for ephemeral sets that are
    /// written once and discarded at the end of the frame.
    pub fn apply_writes(&self) {
        self.submit(self.writes.iter().copied());
    }

    fn submit(&self, ops: impl Iterator<Item = WriteOp>) {
        let ops: Vec<_> = ops.collect();
        // The write records point into these vectors; the reserved capacity
        // keeps the pointers stable while they fill.
        let mut buffer_infos = Vec::with_capacity(ops.len());
        let mut image_infos = Vec::with_capacity(ops.len());
        let mut writes = Vec::with_capacity(ops.len());

        for op in &ops {
            let mut write = vk::WriteDescriptorSet {
                dst_set: self.handle,
                dst_binding: op.binding,
                dst_array_element: op.array_element,
                descriptor_count: 1,
                descriptor_type: op.descriptor_type,
                ..Default::default()
            };
            match op.info {
                WriteInfo::Buffer(info) => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: info.buffer,
                        offset: info.offset,
                        range: info.range,
                    });
                    write.p_buffer_info = &buffer_infos[buffer_infos.len() - 1];
                }
                WriteInfo::Image(info) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: info.sampler,
                        image_view: info.image_view,
                        image_layout: info.layout,
                    });
                    write.p_image_info = &image_infos[image_infos.len() - 1];
                }
            }
            writes.push(write);
        }

        if !writes.is_empty() {
            unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn limits(uniform: u32, storage: u32) -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            max_uniform_buffer_range: uniform,
            max_storage_buffer_range: storage,
            ..Default::default()
        }
    }

    fn uniform_binding(binding: u32) -> LayoutBinding {
        LayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            flags: vk::DescriptorBindingFlags::empty(),
        }
    }

    fn buffer_map(binding: u32, range: vk::DeviceSize) -> BindingMap<BufferBinding> {
        let mut elements = BTreeMap::new();
        elements.insert(
            0,
            BufferBinding {
                buffer: vk::Buffer::null(),
                offset: 0,
                range,
            },
        );
        let mut map = BTreeMap::new();
        map.insert(binding, elements);
        map
    }

    #[test]
    fn oversized_uniform_range_is_clipped_not_rejected() {
        let limits = limits(64 * 1024, 128 * 1024 * 1024);
        let (range, clipped) = clip_buffer_range(vk::DescriptorType::UNIFORM_BUFFER, 1 << 20, &limits);
        assert!(clipped);
        assert_eq!(range, 64 * 1024);

        let (range, clipped) = clip_buffer_range(vk::DescriptorType::UNIFORM_BUFFER, 4 * 1024, &limits);
        assert!(!clipped);
        assert_eq!(range, 4 * 1024);

        // Non-buffer descriptors are never clipped.
        let (range, clipped) = clip_buffer_range(vk::DescriptorType::SAMPLED_IMAGE, 1 << 30, &limits);
        assert!(!clipped);
        assert_eq!(range, 1 << 30);
    }

    #[test]
    fn write_ops_clip_and_skip_undeclared_bindings() {
        let mut bindings = FxHashMap::default();
        bindings.insert(0, uniform_binding(0));

        let mut buffers = buffer_map(0, 1 << 20);
        buffers.append(&mut buffer_map(7, 256)); // not declared by the layout

        let writes = build_write_ops(&bindings, 0, &buffers, &BTreeMap::new(), &limits(64 * 1024, 1 << 27));
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].binding, 0);
        match writes[0].info {
            WriteInfo::Buffer(info) => assert_eq!(info.range, 64 * 1024),
            WriteInfo::Image(_) => panic!("expected a buffer write"),
        }
    }

    #[test]
    fn unchanged_writes_are_not_reissued() {
        let mut bindings = FxHashMap::default();
        bindings.insert(0, uniform_binding(0));
        bindings.insert(1, uniform_binding(1));

        let mut buffers = buffer_map(0, 256);
        buffers.append(&mut buffer_map(1, 512));
        let writes = build_write_ops(&bindings, 0, &buffers, &BTreeMap::new(), &limits(1 << 16, 1 << 16));

        let mut applied = FxHashMap::default();
        let first = pending_writes(&writes, &applied, &[]);
        assert_eq!(first.len(), 2);
        for (op, hash) in &first {
            applied.insert((op.binding, op.array_element), *hash);
        }

        assert!(pending_writes(&writes, &applied, &[]).is_empty());
    }

    #[test]
    fn changing_one_binding_reissues_exactly_that_write() {
        let mut bindings = FxHashMap::default();
        bindings.insert(0, uniform_binding(0));
        bindings.insert(1, uniform_binding(1));

        let mut buffers = buffer_map(0, 256);
        buffers.append(&mut buffer_map(1, 512));
        let limits = limits(1 << 16, 1 << 16);
        let writes = build_write_ops(&bindings, 0, &buffers, &BTreeMap::new(), &limits);

        let mut applied = FxHashMap::default();
        for (op, hash) in pending_writes(&writes, &applied, &[]) {
            applied.insert((op.binding, op.array_element), hash);
        }

        // Move binding 1 to a different offset.
        let mut changed = buffer_map(0, 256);
        let mut moved = buffer_map(1, 512);
        moved.get_mut(&1).unwrap().get_mut(&0).unwrap().offset = 1024;
        changed.append(&mut moved);
        let writes = build_write_ops(&bindings, 0, &changed, &BTreeMap::new(), &limits);

        let pending = pending_writes(&writes, &applied, &[]);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.binding, 1);
    }

    #[test]
    fn update_filter_honors_binding_subset() {
        let mut bindings = FxHashMap::default();
        bindings.insert(0, uniform_binding(0));
        bindings.insert(1, uniform_binding(1));

        let mut buffers = buffer_map(0, 256);
        buffers.append(&mut buffer_map(1, 512));
        let writes = build_write_ops(&bindings, 0, &buffers, &BTreeMap::new(), &limits(1 << 16, 1 << 16));

        let applied = FxHashMap::default();
        let pending = pending_writes(&writes, &applied, &[1]);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.binding, 1);
    }
}

//! Per-swapchain-image frame state: the render target, the sync pools, the
//! per-thread command pools and the per-thread descriptor caches.
use crate::{
    binding_state::BindingMap,
    cache::ResourceCache,
    command_buffer::CommandBuffer,
    command_pool::{CommandPool, ResetMode},
    descriptor::{
        BufferBinding, DescriptorPool, DescriptorSet, DescriptorSetLayout, ImageBinding, MAX_SETS_PER_POOL,
    },
    device::Device,
    queue::Queue,
    render_target::RenderTarget,
    sync::{FencePool, SemaphorePool},
    Error, Result, vk,
};
use fxhash::FxHashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// How [`RenderFrame::request_descriptor_set`] materializes sets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DescriptorSetStrategy {
    /// Reuse a cached set when the binding content matches, applying only
    /// the writes that changed. Trades memory for fewer descriptor updates.
    #[default]
    StoreInCache,
    /// Allocate a fresh set every time and apply all writes. Simpler, and
    /// safer under heavily volatile per-draw bindings.
    CreateDirectly,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct DescriptorSetCacheKey {
    layout: vk::DescriptorSetLayout,
    buffers: BindingMap<BufferBinding>,
    images: BindingMap<ImageBinding>,
}

/// One recording thread's descriptor pools and cached sets.
pub(crate) struct FrameDescriptors {
    pools: FxHashMap<vk::DescriptorSetLayout, DescriptorPool>,
    sets: FxHashMap<DescriptorSetCacheKey, DescriptorSet>,
}

impl FrameDescriptors {
    fn new() -> FrameDescriptors {
        FrameDescriptors {
            pools: FxHashMap::default(),
            sets: FxHashMap::default(),
        }
    }

    pub(crate) fn request_descriptor_set(
        &mut self,
        device: &Device,
        layout: &Arc<DescriptorSetLayout>,
        buffer_infos: BindingMap<BufferBinding>,
        image_infos: BindingMap<ImageBinding>,
        strategy: DescriptorSetStrategy,
    ) -> Result<vk::DescriptorSet> {
        let pool = self
            .pools
            .entry(layout.handle())
            .or_insert_with(|| DescriptorPool::new(device.clone(), layout, MAX_SETS_PER_POOL));

        match strategy {
            DescriptorSetStrategy::CreateDirectly => {
                let set = DescriptorSet::new(device.clone(), layout, pool, buffer_infos, image_infos)?;
                set.apply_writes();
                Ok(set.handle())
            }
            DescriptorSetStrategy::StoreInCache => {
                let key = DescriptorSetCacheKey {
                    layout: layout.handle(),
                    buffers: buffer_infos.clone(),
                    images: image_infos.clone(),
                };
                if let Some(set) = self.sets.get_mut(&key) {
                    set.update(&[]);
                    return Ok(set.handle());
                }
                let mut set = DescriptorSet::new(device.clone(), layout, pool, buffer_infos, image_infos)?;
                set.update(&[]);
                let handle = set.handle();
                self.sets.insert(key, set);
                Ok(handle)
            }
        }
    }

    fn set_count(&self) -> usize {
        self.sets.len()
    }
}

/// One swapchain image slot's worth of per-frame state.
///
/// [`reset`](Self::reset) is the single reclamation entry point, called at
/// the start of every cycle that reuses the slot.
pub struct RenderFrame {
    device: Device,
    cache: Arc<ResourceCache>,
    render_target: RenderTarget,
    fence_pool: FencePool,
    semaphore_pool: SemaphorePool,
    // Queue family index -> one command pool per recording thread.
    command_pools: FxHashMap<u32, Vec<CommandPool>>,
    descriptors: Vec<Arc<Mutex<FrameDescriptors>>>,
    descriptor_strategy: DescriptorSetStrategy,
    thread_count: usize,
}

impl RenderFrame {
    pub fn new(
        device: Device,
        render_target: RenderTarget,
        cache: Arc<ResourceCache>,
        thread_count: usize,
    ) -> RenderFrame {
        let thread_count = thread_count.max(1);
        RenderFrame {
            fence_pool: FencePool::new(device.clone()),
            semaphore_pool: SemaphorePool::new(device.clone()),
            device,
            cache,
            render_target,
            command_pools: FxHashMap::default(),
            descriptors: (0..thread_count)
                .map(|_| Arc::new(Mutex::new(FrameDescriptors::new())))
                .collect(),
            descriptor_strategy: DescriptorSetStrategy::default(),
            thread_count,
        }
    }

    pub fn render_target(&self) -> &RenderTarget {
        &self.render_target
    }

    /// Swaps in a new render target after a swapchain rebuild.
    pub fn update_render_target(&mut self, render_target: RenderTarget) {
        self.render_target = render_target;
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn set_descriptor_strategy(&mut self, strategy: DescriptorSetStrategy) {
        self.descriptor_strategy = strategy;
    }

    pub fn fence_pool(&self) -> &FencePool {
        &self.fence_pool
    }

    pub fn semaphore_pool(&self) -> &SemaphorePool {
        &self.semaphore_pool
    }

    pub fn request_fence(&mut self) -> Result<vk::Fence> {
        self.fence_pool.request_fence()
    }

    pub fn request_semaphore(&mut self) -> Result<vk::Semaphore> {
        self.semaphore_pool.request_semaphore()
    }

    pub fn request_out_semaphore(&mut self) -> Result<vk::Semaphore> {
        self.semaphore_pool.request_out_semaphore()
    }

    pub fn release_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.semaphore_pool.release_semaphore(semaphore);
    }

    /// Returns a command buffer recording into this frame, from the pool for
    /// `(queue family, thread_index)`.
    ///
    /// Requesting a different reset mode than the existing pools were
    /// created with waits for the device to go idle and rebuilds them;
    /// changing the reset policy invalidates in-flight assumptions.
    pub fn request_command_buffer(
        &mut self,
        queue: &Queue,
        reset_mode: ResetMode,
        level: vk::CommandBufferLevel,
        thread_index: usize,
    ) -> Result<CommandBuffer> {
        if thread_index >= self.thread_count {
            return Err(Error::InvalidState {
                op: "request_command_buffer",
            });
        }

        let family_index = queue.family_index();
        let rebuild = match self.command_pools.get(&family_index) {
            Some(pools) => pools.first().map_or(true, |pool| pool.reset_mode() != reset_mode),
            None => false,
        };
        if rebuild {
            debug!("command pool reset mode changed for family {family_index}, rebuilding pools");
            self.device.wait_idle()?;
            self.command_pools.remove(&family_index);
        }

        if !self.command_pools.contains_key(&family_index) {
            let pools = (0..self.thread_count)
                .map(|thread| CommandPool::new(self.device.clone(), family_index, reset_mode, thread))
                .collect::<Result<Vec<_>>>()?;
            self.command_pools.insert(family_index, pools);
        }

        let pool = &mut self
            .command_pools
            .get_mut(&family_index)
            .expect("pools were just inserted")[thread_index];
        let handle = pool.request_command_buffer(level)?;

        Ok(CommandBuffer::new(
            self.device.clone(),
            handle,
            level,
            thread_index,
            self.cache.clone(),
            self.descriptors[thread_index].clone(),
            self.descriptor_strategy,
        ))
    }

    /// Materializes a descriptor set through this frame's per-thread caches
    /// using the frame's descriptor strategy.
    pub fn request_descriptor_set(
        &self,
        layout: &Arc<DescriptorSetLayout>,
        buffer_infos: BindingMap<BufferBinding>,
        image_infos: BindingMap<ImageBinding>,
        thread_index: usize,
    ) -> Result<vk::DescriptorSet> {
        let descriptors = self.descriptors.get(thread_index).ok_or(Error::InvalidState {
            op: "request_descriptor_set",
        })?;
        descriptors.lock().unwrap().request_descriptor_set(
            &self.device,
            layout,
            buffer_infos,
            image_infos,
            self.descriptor_strategy,
        )
    }

    /// Number of descriptor sets cached for one recording thread.
    pub fn descriptor_set_count(&self, thread_index: usize) -> usize {
        self.descriptors
            .get(thread_index)
            .map_or(0, |descriptors| descriptors.lock().unwrap().set_count())
    }

    /// Number of command buffers allocated for `(queue family, thread)` at
    /// the given level.
    pub fn command_buffer_count(&self, family_index: u32, thread_index: usize, level: vk::CommandBufferLevel) -> usize {
        self.command_pools
            .get(&family_index)
            .and_then(|pools| pools.get(thread_index))
            .map_or(0, |pool| pool.buffer_count(level))
    }

    /// Reclaims the frame once its prior GPU work has finished.
    ///
    /// The order is load-bearing: fences are waited before anything that
    /// references GPU-visible resources is reset, and the semaphore pool is
    /// reclaimed last because the frame's in-flight semaphore usage is
    /// bounded by its own fences.
    pub fn reset(&mut self) -> Result<()> {
        self.fence_pool.wait(u64::MAX)?;
        self.fence_pool.reset()?;
        for pools in self.command_pools.values_mut() {
            for pool in pools {
                pool.reset_pool()?;
            }
        }
        self.semaphore_pool.reset();
        Ok(())
    }
}

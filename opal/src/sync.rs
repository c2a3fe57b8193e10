//! Per-frame pools of recyclable GPU synchronization primitives.
use crate::{device::Device, Result, vk};
use tracing::trace;

/// Maximum time the pool destructors wait for outstanding fences.
pub(crate) const FENCE_WAIT_TIMEOUT_NS: u64 = 5_000_000_000;

/// A growable pool of fences recycled frame over frame.
///
/// Fences handed out by [`request_fence`](Self::request_fence) are "active"
/// until [`reset`](Self::reset) rewinds the pool. `reset` must only be called
/// after a [`wait`](Self::wait) that covered all active fences; resetting a
/// fence the GPU may still signal is a caller error.
pub struct FencePool {
    device: Device,
    fences: Vec<vk::Fence>,
    active_count: usize,
}

impl FencePool {
    pub fn new(device: Device) -> FencePool {
        FencePool {
            device,
            fences: vec![],
            active_count: 0,
        }
    }

    /// Returns an unsignaled fence, growing the pool if no recycled fence is
    /// available.
    pub fn request_fence(&mut self) -> Result<vk::Fence> {
        if self.active_count < self.fences.len() {
            let fence = self.fences[self.active_count];
            self.active_count += 1;
            return Ok(fence);
        }

        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&create_info, None)? };
        trace!("created pooled fence {fence:?}");
        self.fences.push(fence);
        self.active_count += 1;
        Ok(fence)
    }

    /// Blocks until every fence handed out since the last `reset` is
    /// signaled, or `timeout_ns` elapses.
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        if self.active_count == 0 {
            return Ok(());
        }
        unsafe {
            self.device
                .wait_for_fences(&self.fences[..self.active_count], true, timeout_ns)?
        };
        Ok(())
    }

    /// Makes all active fences reusable and rewinds the active count to zero.
    pub fn reset(&mut self) -> Result<()> {
        if self.active_count == 0 {
            return Ok(());
        }
        unsafe { self.device.reset_fences(&self.fences[..self.active_count])? };
        self.active_count = 0;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }
}

impl Drop for FencePool {
    fn drop(&mut self) {
        let _ = self.wait(FENCE_WAIT_TIMEOUT_NS);
        let _ = self.reset();
        for fence in self.fences.drain(..) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }
}

/// A growable pool of binary semaphores recycled frame over frame.
///
/// Two allocation modes exist: [`request_semaphore`](Self::request_semaphore)
/// hands out a tracked semaphore rewound on `reset`, while
/// [`request_out_semaphore`](Self::request_out_semaphore) transfers ownership
/// to the caller (used for the swapchain acquire semaphore, whose lifetime is
/// tied to the presentation engine). An out semaphore comes back through
/// [`release_semaphore`](Self::release_semaphore), which defers it to a
/// released list; `reset` then moves released semaphores back into the pool.
/// The deferral matters: a semaphore the GPU may still wait on cannot be
/// recycled until the frame's fence wait has retired, which is exactly when
/// `reset` runs.
pub struct SemaphorePool {
    device: Device,
    semaphores: Vec<vk::Semaphore>,
    released: Vec<vk::Semaphore>,
    active_count: usize,
}

impl SemaphorePool {
    pub fn new(device: Device) -> SemaphorePool {
        SemaphorePool {
            device,
            semaphores: vec![],
            released: vec![],
            active_count: 0,
        }
    }

    /// Returns a tracked semaphore that becomes reusable after `reset`.
    pub fn request_semaphore(&mut self) -> Result<vk::Semaphore> {
        if self.active_count < self.semaphores.len() {
            let semaphore = self.semaphores[self.active_count];
            self.active_count += 1;
            return Ok(semaphore);
        }

        let semaphore = self.create_semaphore()?;
        self.semaphores.push(semaphore);
        self.active_count += 1;
        Ok(semaphore)
    }

    /// Returns a semaphore the pool no longer tracks. Hand it back with
    /// [`release_semaphore`](Self::release_semaphore) once its last GPU use
    /// is bounded by a fence of the same frame.
    pub fn request_out_semaphore(&mut self) -> Result<vk::Semaphore> {
        // Semaphores past the active watermark are idle and can leave the
        // pool directly.
        if self.active_count < self.semaphores.len() {
            let semaphore = self.semaphores.pop().expect("watermark below a non-empty pool");
            return Ok(semaphore);
        }
        self.create_semaphore()
    }

    /// Defers `semaphore` for reclamation at the next `reset`.
    pub fn release_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.released.push(semaphore);
    }

    /// Rewinds the active count and reclaims released semaphores.
    pub fn reset(&mut self) {
        self.active_count = 0;
        self.semaphores.append(&mut self.released);
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn semaphore_count(&self) -> usize {
        self.semaphores.len()
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None)? };
        trace!("created pooled semaphore {semaphore:?}");
        Ok(semaphore)
    }
}

impl Drop for SemaphorePool {
    fn drop(&mut self) {
        self.reset();
        for semaphore in self.semaphores.drain(..) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }
}

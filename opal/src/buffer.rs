use crate::{device::Device, MemoryLocation, Result, vk};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

/// A buffer with bound device memory. Referenced (but never owned) by the
/// resource binding state of a command buffer.
pub struct Buffer {
    device: Device,
    handle: vk::Buffer,
    size: vk::DeviceSize,
    allocation: Option<Allocation>,
}

impl Buffer {
    pub fn new(
        device: Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Buffer> {
        let create_info = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = unsafe { device.create_buffer(&create_info, None)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation = match device.allocate_memory(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(err);
            }
        };
        if let Err(err) = unsafe { device.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) } {
            device.free_memory(allocation);
            unsafe { device.destroy_buffer(handle, None) };
            return Err(err.into());
        }

        Ok(Buffer {
            device,
            handle,
            size,
            allocation: Some(allocation),
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.handle, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free_memory(allocation);
        }
    }
}

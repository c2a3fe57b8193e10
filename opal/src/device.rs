//! Abstractions over a vulkan device.
use crate::{queue::Queue, Error, Result};
use ash::{extensions::khr, vk};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use std::{fmt, mem::ManuallyDrop, ops::Deref, sync::Arc, sync::Mutex};

/// Describes one queue family of an already created logical device.
#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyInfo {
    pub family_index: u32,
    pub queue_count: u32,
    pub properties: vk::QueueFamilyProperties,
    pub supports_present: bool,
}

/// Wrapper around a vulkan device, its queues and the device memory allocator.
pub(crate) struct DeviceInner {
    // Keeps the vulkan library loaded for as long as the device lives.
    _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: ash::Device,
    queues: Vec<Queue>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub(crate) vk_khr_surface: khr::Surface,
    pub(crate) vk_khr_swapchain: khr::Swapchain,
}

/// Shared handle to a device. Cheap to clone; the underlying `VkDevice` is
/// destroyed when the last clone is dropped.
#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("physical_device", &self.inner.physical_device)
            .finish_non_exhaustive()
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.inner.device
    }
}

impl Device {
    /// Wraps an already created logical device.
    ///
    /// The wrapper takes ownership of `device` and destroys it when the last
    /// clone is dropped. `instance` must outlive the returned device.
    ///
    /// # Safety
    ///
    /// `device` must have been created from `physical_device` on `instance`,
    /// with the queues described by `queue_families`.
    pub unsafe fn from_handles(
        entry: &ash::Entry,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_families: &[QueueFamilyInfo],
    ) -> Result<Device> {
        let mut queues = vec![];
        for family in queue_families {
            for index in 0..family.queue_count {
                let handle = device.get_device_queue(family.family_index, index);
                queues.push(Queue {
                    handle,
                    family_index: family.family_index,
                    index,
                    properties: family.properties,
                    supports_present: family.supports_present,
                });
            }
        }

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let vk_khr_surface = khr::Surface::new(entry, instance);
        let vk_khr_swapchain = khr::Swapchain::new(instance, &device);
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        Ok(Device {
            inner: Arc::new(DeviceInner {
                _entry: entry.clone(),
                instance: instance.clone(),
                physical_device,
                properties,
                memory_properties,
                device,
                queues,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                vk_khr_surface,
                vk_khr_swapchain,
            }),
        })
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.inner.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.inner.properties
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.inner.properties.limits
    }

    /// Returns a queue whose family advertises all of `flags`, by index
    /// within the matching queues.
    pub fn queue(&self, flags: vk::QueueFlags, index: u32) -> Result<&Queue> {
        self.inner
            .queues
            .iter()
            .filter(|q| q.properties.queue_flags.contains(flags))
            .nth(index as usize)
            .ok_or(Error::NoSuitableQueue)
    }

    pub fn graphics_queue(&self) -> Result<&Queue> {
        self.queue(vk::QueueFlags::GRAPHICS, 0)
    }

    /// Returns the first queue able to present to the surface the device was
    /// created against.
    pub fn present_queue(&self) -> Result<&Queue> {
        self.inner
            .queues
            .iter()
            .find(|q| q.supports_present)
            .ok_or(Error::NoSuitableQueue)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.inner.device.device_wait_idle()? };
        Ok(())
    }

    /// Returns the index of the first memory type compatible with the given
    /// type bitmask and property flags.
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        let memory_types =
            &self.inner.memory_properties.memory_types[..self.inner.memory_properties.memory_type_count as usize];
        memory_types
            .iter()
            .enumerate()
            .position(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(properties))
            .map(|i| i as u32)
    }

    pub(crate) fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.inner
                .instance
                .get_physical_device_format_properties(self.inner.physical_device, format)
        }
    }

    pub(crate) fn allocate_memory(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        let mut allocator = self.inner.allocator.lock().unwrap();
        Ok(allocator.allocate(desc)?)
    }

    pub(crate) fn free_memory(&self, allocation: Allocation) {
        let mut allocator = self.inner.allocator.lock().unwrap();
        if let Err(err) = allocator.free(allocation) {
            tracing::error!("failed to free device memory: {err}");
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

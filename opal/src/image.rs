use crate::{aspects_for_format, device::Device, MemoryLocation, Result, vk};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

/// A 2D image. Either owned (backed by an allocation made through the
/// device) or borrowed from a swapchain, in which case the presentation
/// engine owns the `VkImage` and only the wrapper is dropped.
pub struct Image {
    device: Device,
    handle: vk::Image,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    sample_count: vk::SampleCountFlags,
    allocation: Option<Allocation>,
}

impl Image {
    /// Creates and binds a device-local image.
    pub fn new(
        device: Device,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        location: MemoryLocation,
    ) -> Result<Image> {
        let create_info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let handle = unsafe { device.create_image(&create_info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let allocation = match device.allocate_memory(&AllocationCreateDesc {
            name: "image",
            requirements,
            location,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(handle, None) };
                return Err(err);
            }
        };
        if let Err(err) = unsafe { device.bind_image_memory(handle, allocation.memory(), allocation.offset()) } {
            device.free_memory(allocation);
            unsafe { device.destroy_image(handle, None) };
            return Err(err.into());
        }

        Ok(Image {
            device,
            handle,
            extent,
            format,
            usage,
            sample_count: vk::SampleCountFlags::TYPE_1,
            allocation: Some(allocation),
        })
    }

    /// Wraps a swapchain-owned image.
    pub fn from_swapchain(device: Device, handle: vk::Image, extent: vk::Extent2D, format: vk::Format) -> Image {
        Image {
            device,
            handle,
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            sample_count: vk::SampleCountFlags::TYPE_1,
            allocation: None,
        }
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.sample_count
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            unsafe { self.device.destroy_image(self.handle, None) };
            self.device.free_memory(allocation);
        }
    }
}

/// A view over the full subresource range of an [`Image`].
pub struct ImageView {
    device: Device,
    handle: vk::ImageView,
    image: vk::Image,
    format: vk::Format,
    subresource_range: vk::ImageSubresourceRange,
}

impl ImageView {
    pub fn new(image: &Image) -> Result<ImageView> {
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: aspects_for_format(image.format()),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let create_info = vk::ImageViewCreateInfo {
            image: image.handle(),
            view_type: vk::ImageViewType::TYPE_2D,
            format: image.format(),
            subresource_range,
            ..Default::default()
        };
        let handle = unsafe { image.device().create_image_view(&create_info, None)? };

        Ok(ImageView {
            device: image.device().clone(),
            handle,
            image: image.handle(),
            format: image.format(),
            subresource_range,
        })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.subresource_range
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.handle, None) };
    }
}

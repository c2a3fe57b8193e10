//! A narrow swapchain wrapper: creation/recreation clamped to the surface
//! capabilities, image access, and acquisition. Everything else about
//! presentation policy lives with the platform code that owns the surface.
use crate::{device::Device, Result, vk};
use tracing::debug;

#[derive(Copy, Clone, Debug)]
pub struct SwapchainProperties {
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub image_usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

const SURFACE_FORMAT_PRIORITY: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

fn choose_extent(requested: vk::Extent2D, capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    // A current extent of u32::MAX means the surface lets the swapchain pick.
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

fn choose_image_count(requested: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = requested.max(capabilities.min_image_count);
    // A max of zero means unbounded.
    if capabilities.max_image_count != 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    for &format in &SURFACE_FORMAT_PRIORITY {
        if let Some(found) = available
            .iter()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        {
            return *found;
        }
    }
    available[0]
}

fn choose_image_usage(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let requested = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
    let usage = requested & capabilities.supported_usage_flags;
    if usage.is_empty() {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    } else {
        usage
    }
}

fn choose_present_mode(requested: vk::PresentModeKHR, available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&requested) {
        requested
    } else {
        // FIFO support is mandatory.
        vk::PresentModeKHR::FIFO
    }
}

fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    let preference = [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ];
    for alpha in preference {
        if capabilities.supported_composite_alpha.contains(alpha) {
            return alpha;
        }
    }
    vk::CompositeAlphaFlagsKHR::OPAQUE
}

/// A swapchain and its images. The images are owned by the presentation
/// engine; only the `VkSwapchainKHR` is destroyed with this wrapper.
pub struct Swapchain {
    device: Device,
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    properties: SwapchainProperties,
}

impl Swapchain {
    pub fn new(
        device: Device,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        image_count: u32,
    ) -> Result<Swapchain> {
        Swapchain::create(device, surface, extent, image_count, vk::SwapchainKHR::null())
    }

    /// The resize constructor: rebuilds over the old swapchain's surface
    /// with a new extent, reusing its image count.
    pub fn recreate(old: &Swapchain, extent: vk::Extent2D) -> Result<Swapchain> {
        Swapchain::create(
            old.device.clone(),
            old.surface,
            extent,
            old.properties.image_count,
            old.handle,
        )
    }

    fn create(
        device: Device,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        image_count: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Swapchain> {
        let surface_loader = &device.inner.vk_khr_surface;
        let physical_device = device.physical_device();
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        let properties = SwapchainProperties {
            extent: choose_extent(extent, &capabilities),
            surface_format: choose_surface_format(&formats),
            image_count: choose_image_count(image_count, &capabilities),
            present_mode: choose_present_mode(vk::PresentModeKHR::FIFO, &present_modes),
            image_usage: choose_image_usage(&capabilities),
            pre_transform: capabilities.current_transform,
            composite_alpha: choose_composite_alpha(&capabilities),
        };

        let create_info = vk::SwapchainCreateInfoKHR {
            surface,
            min_image_count: properties.image_count,
            image_format: properties.surface_format.format,
            image_color_space: properties.surface_format.color_space,
            image_extent: properties.extent,
            image_array_layers: 1,
            image_usage: properties.image_usage,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: properties.pre_transform,
            composite_alpha: properties.composite_alpha,
            present_mode: properties.present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        let swapchain_loader = &device.inner.vk_khr_swapchain;
        let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(handle)? };
        debug!(
            "created swapchain: {}x{}, {} images",
            properties.extent.width,
            properties.extent.height,
            images.len()
        );

        Ok(Swapchain {
            device,
            surface,
            handle,
            images,
            properties,
        })
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn properties(&self) -> &SwapchainProperties {
        &self.properties
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.properties.extent
    }

    pub fn format(&self) -> vk::Format {
        self.properties.surface_format.format
    }

    /// Acquires the next image, signaling `semaphore` when it is usable.
    /// Surface errors (`ERROR_OUT_OF_DATE_KHR`) are surfaced to the caller,
    /// whose frame loop retries after the next `begin` has had a chance to
    /// rebuild the swapchain.
    pub fn acquire_image(&self, semaphore: vk::Semaphore) -> Result<u32> {
        let (index, _suboptimal) = unsafe {
            self.device
                .inner
                .vk_khr_swapchain
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())?
        };
        Ok(index)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe { self.device.inner.vk_khr_swapchain.destroy_swapchain(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: vk::Extent2D, min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: min_count,
            max_image_count: max_count,
            ..Default::default()
        }
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let caps = capabilities(vk::Extent2D { width: 800, height: 600 }, 2, 8);
        let extent = choose_extent(vk::Extent2D { width: 1024, height: 768 }, &caps);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_when_surface_is_flexible() {
        let caps = capabilities(
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            2,
            8,
        );
        let extent = choose_extent(
            vk::Extent2D {
                width: 10_000,
                height: 0,
            },
            &caps,
        );
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn image_count_respects_surface_bounds() {
        let caps = capabilities(vk::Extent2D::default(), 2, 3);
        assert_eq!(choose_image_count(1, &caps), 2);
        assert_eq!(choose_image_count(8, &caps), 3);

        // max_image_count of zero means unbounded
        let caps = capabilities(vk::Extent2D::default(), 2, 0);
        assert_eq!(choose_image_count(8, &caps), 8);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R5G6B5_UNORM_PACK16,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&available).format, vk::Format::B8G8R8A8_SRGB);

        let fallback_only = [vk::SurfaceFormatKHR {
            format: vk::Format::R5G6B5_UNORM_PACK16,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&fallback_only).format,
            vk::Format::R5G6B5_UNORM_PACK16
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::MAILBOX, &available),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::IMMEDIATE, &available),
            vk::PresentModeKHR::FIFO
        );
    }
}

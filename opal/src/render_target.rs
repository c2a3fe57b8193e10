use crate::{
    device::Device, image::Image, image::ImageView, is_depth_stencil_format, render_pass::Attachment,
    MemoryLocation, Result, vk,
};

/// The set of attachment images and views a render pass writes into for one
/// frame slot.
pub struct RenderTarget {
    extent: vk::Extent2D,
    images: Vec<Image>,
    views: Vec<ImageView>,
    attachments: Vec<Attachment>,
}

impl RenderTarget {
    /// Takes ownership of the attachment images and derives one view and one
    /// [`Attachment`] description per image.
    pub fn new(images: Vec<Image>) -> Result<RenderTarget> {
        let extent = images.first().map(|image| image.extent()).unwrap_or_default();
        let mut views = vec![];
        let mut attachments = vec![];
        for image in &images {
            views.push(ImageView::new(image)?);
            attachments.push(Attachment {
                format: image.format(),
                sample_count: image.sample_count(),
                usage: image.usage(),
                initial_layout: vk::ImageLayout::UNDEFINED,
            });
        }
        Ok(RenderTarget {
            extent,
            images,
            views,
            attachments,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn views(&self) -> &[ImageView] {
        &self.views
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

/// Builds the render target for one swapchain image. Injected into the
/// render context so the attachment set is an explicit composition choice
/// rather than hidden global state.
pub trait RenderTargetFactory: Send + Sync {
    fn create_render_target(&self, color: Image) -> Result<RenderTarget>;
}

/// The default factory: the swapchain color attachment plus a transient
/// device-local depth attachment.
pub struct ColorDepthFactory;

impl RenderTargetFactory for ColorDepthFactory {
    fn create_render_target(&self, color: Image) -> Result<RenderTarget> {
        let device = color.device().clone();
        let depth_format = choose_depth_format(&device, &DEPTH_FORMAT_PRIORITY);
        let depth = Image::new(
            device,
            color.extent(),
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            MemoryLocation::GpuOnly,
        )?;
        RenderTarget::new(vec![color, depth])
    }
}

/// A color-only factory for passes that do their own depth handling.
pub struct ColorOnlyFactory;

impl RenderTargetFactory for ColorOnlyFactory {
    fn create_render_target(&self, color: Image) -> Result<RenderTarget> {
        RenderTarget::new(vec![color])
    }
}

const DEPTH_FORMAT_PRIORITY: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Picks the first format in `priority` usable as a depth/stencil
/// attachment with optimal tiling.
pub fn choose_depth_format(device: &Device, priority: &[vk::Format]) -> vk::Format {
    for &format in priority {
        debug_assert!(is_depth_stencil_format(format));
        let properties = device.format_properties(format);
        if properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return format;
        }
    }
    vk::Format::D16_UNORM
}

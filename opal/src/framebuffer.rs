use crate::{device::Device, render_pass::RenderPass, render_target::RenderTarget, Result, vk};

/// A framebuffer binding one render target's views to a compatible render
/// pass. Cache-owned; purged wholesale when the swapchain is rebuilt.
pub struct Framebuffer {
    device: Device,
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub(crate) fn new(device: &Device, render_target: &RenderTarget, render_pass: &RenderPass) -> Result<Framebuffer> {
        let attachments: Vec<_> = render_target.views().iter().map(|view| view.handle()).collect();
        let extent = render_target.extent();
        let create_info = vk::FramebufferCreateInfo {
            render_pass: render_pass.handle(),
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let handle = unsafe { device.create_framebuffer(&create_info, None)? };
        Ok(Framebuffer {
            device: device.clone(),
            handle,
            extent,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.handle, None) };
    }
}

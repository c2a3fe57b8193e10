use crate::{device::Device, Result, vk};

/// A device queue together with the family properties it was created from.
#[derive(Copy, Clone, Debug)]
pub struct Queue {
    pub(crate) handle: vk::Queue,
    pub(crate) family_index: u32,
    pub(crate) index: u32,
    pub(crate) properties: vk::QueueFamilyProperties,
    pub(crate) supports_present: bool,
}

impl Queue {
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn properties(&self) -> &vk::QueueFamilyProperties {
        &self.properties
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn submit(&self, device: &Device, submits: &[vk::SubmitInfo], fence: vk::Fence) -> Result<()> {
        unsafe { device.queue_submit(self.handle, submits, fence)? };
        Ok(())
    }

    /// Presents to the swapchain(s) named by `present_info`.
    ///
    /// Surface errors (`ERROR_OUT_OF_DATE_KHR` in particular) are passed
    /// through to the caller; a suboptimal present is not treated as an
    /// error.
    pub fn present(&self, device: &Device, present_info: &vk::PresentInfoKHR) -> Result<bool> {
        let suboptimal = unsafe { device.inner.vk_khr_swapchain.queue_present(self.handle, present_info)? };
        Ok(suboptimal)
    }
}

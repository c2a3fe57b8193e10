use crate::{device::Device, Result, vk};

/// An immutable sampler, referenced (but never owned) by the resource
/// binding state of a command buffer.
pub struct Sampler {
    device: Device,
    handle: vk::Sampler,
}

impl Sampler {
    pub fn new(device: Device, create_info: &vk::SamplerCreateInfo) -> Result<Sampler> {
        let handle = unsafe { device.create_sampler(create_info, None)? };
        Ok(Sampler { device, handle })
    }

    /// A linear-filtering, repeat-addressing sampler.
    pub fn linear(device: Device) -> Result<Sampler> {
        let create_info = vk::SamplerCreateInfo {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_lod: vk::LOD_CLAMP_NONE,
            ..Default::default()
        };
        Sampler::new(device, &create_info)
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.handle, None) };
    }
}

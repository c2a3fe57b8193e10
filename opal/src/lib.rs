pub use ash::{self, vk};
pub use gpu_allocator::MemoryLocation;

pub use buffer::*;
pub use cache::*;
pub use command_buffer::*;
pub use command_pool::*;
pub use context::*;
pub use descriptor::*;
pub use device::*;
pub use error::*;
pub use frame::*;
pub use framebuffer::*;
pub use image::*;
pub use pipeline::*;
pub use queue::*;
pub use render_pass::*;
pub use render_target::*;
pub use sampler::*;
pub use shader::*;
pub use subpass::*;
pub use swapchain::*;
pub use sync::*;

mod binding_state;
mod buffer;
mod cache;
mod command_buffer;
mod command_pool;
mod context;
mod descriptor;
mod device;
mod error;
mod frame;
mod framebuffer;
mod image;
pub mod init;
mod pipeline;
mod queue;
mod render_pass;
mod render_target;
mod sampler;
mod shader;
mod subpass;
mod swapchain;
mod sync;

pub use binding_state::{BindingMap, ResourceBindingState, ResourceInfo, ResourceSet};

////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn is_depth_and_stencil_format(fmt: vk::Format) -> bool {
    matches!(
        fmt,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn is_depth_only_format(fmt: vk::Format) -> bool {
    matches!(
        fmt,
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT
    )
}

pub fn is_stencil_only_format(fmt: vk::Format) -> bool {
    matches!(fmt, vk::Format::S8_UINT)
}

pub fn is_depth_stencil_format(fmt: vk::Format) -> bool {
    is_depth_only_format(fmt) || is_stencil_only_format(fmt) || is_depth_and_stencil_format(fmt)
}

pub fn aspects_for_format(fmt: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_only_format(fmt) {
        vk::ImageAspectFlags::DEPTH
    } else if is_stencil_only_format(fmt) {
        vk::ImageAspectFlags::STENCIL
    } else if is_depth_and_stencil_format(fmt) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

use crate::{shader::ShaderResourceType, vk};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vulkan call failed")]
    Vulkan(#[from] vk::Result),
    #[error("failed to load the vulkan library")]
    Loading(#[from] ash::LoadingError),
    #[error("device memory allocation failed")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("no physical device with vulkan support")]
    NoPhysicalDevice,
    #[error("no queue matches the requested capabilities")]
    NoSuitableQueue,
    #[error("`{op}` called in an invalid state")]
    InvalidState { op: &'static str },
    #[error("shader resource type {0:?} has no matching descriptor type")]
    UnsupportedShaderResource(ShaderResourceType),
    #[error("descriptor set layout mixes update-after-bind and dynamic resources")]
    MixedBindingModes,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Instance and device bootstrap helpers.
//!
//! The core types only ever consume an injected [`Device`]; these helpers
//! exist so tests and demos can build one without a windowing stack.
use crate::{device::QueueFamilyInfo, Device, Error, Result};
use ash::{extensions::khr, vk};
use std::ffi::{CStr, CString};
use tracing::debug;

/// Creates a vulkan instance with the given extensions enabled.
///
/// # Safety
///
/// The returned instance is not destroyed automatically; it must outlive
/// every device created from it.
pub unsafe fn create_instance(app_name: &str, extensions: &[&CStr]) -> Result<(ash::Entry, ash::Instance)> {
    let entry = ash::Entry::load()?;

    let app_name = CString::new(app_name).expect("application name contains a nul byte");
    let app_info = vk::ApplicationInfo {
        p_application_name: app_name.as_ptr(),
        api_version: vk::make_api_version(0, 1, 1, 0),
        ..Default::default()
    };

    let extension_ptrs: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();
    let create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        enabled_extension_count: extension_ptrs.len() as u32,
        pp_enabled_extension_names: extension_ptrs.as_ptr(),
        ..Default::default()
    };

    let instance = entry.create_instance(&create_info, None)?;
    Ok((entry, instance))
}

unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let physical_devices = instance.enumerate_physical_devices()?;
    let mut selected = None;
    for phy in &physical_devices {
        let properties = instance.get_physical_device_properties(*phy);
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            selected = Some(*phy);
        }
    }
    selected
        .or_else(|| physical_devices.first().copied())
        .ok_or(Error::NoPhysicalDevice)
}

unsafe fn supported_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[&CStr],
) -> Result<Vec<*const std::os::raw::c_char>> {
    let available = instance.enumerate_device_extension_properties(physical_device)?;
    let mut enabled = vec![];
    for candidate in candidates {
        let found = available
            .iter()
            .any(|ext| CStr::from_ptr(ext.extension_name.as_ptr()) == *candidate);
        if found {
            enabled.push(candidate.as_ptr());
        }
    }
    Ok(enabled)
}

const PORTABILITY_SUBSET: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_KHR_portability_subset\0") };

/// Creates a logical device with one queue per queue family.
///
/// When `surface` is given, the swapchain extension is enabled and each
/// queue family's presentation support is recorded.
///
/// # Safety
///
/// `surface`, if any, must belong to `instance`.
pub unsafe fn create_device(
    entry: &ash::Entry,
    instance: &ash::Instance,
    surface: Option<vk::SurfaceKHR>,
) -> Result<Device> {
    let physical_device = select_physical_device(instance)?;
    let properties = instance.get_physical_device_properties(physical_device);
    debug!(
        "selected physical device: {:?}",
        CStr::from_ptr(properties.device_name.as_ptr())
    );

    let family_properties = instance.get_physical_device_queue_family_properties(physical_device);

    let queue_priority = [1.0f32];
    let queue_create_infos: Vec<_> = (0..family_properties.len())
        .map(|family_index| vk::DeviceQueueCreateInfo {
            queue_family_index: family_index as u32,
            queue_count: 1,
            p_queue_priorities: queue_priority.as_ptr(),
            ..Default::default()
        })
        .collect();

    let mut candidates = vec![PORTABILITY_SUBSET];
    if surface.is_some() {
        candidates.push(khr::Swapchain::name());
    }
    let enabled_extensions = supported_extensions(instance, physical_device, &candidates)?;
    if surface.is_some() && !enabled_extensions.contains(&khr::Swapchain::name().as_ptr()) {
        return Err(Error::Vulkan(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
    }

    let create_info = vk::DeviceCreateInfo {
        queue_create_info_count: queue_create_infos.len() as u32,
        p_queue_create_infos: queue_create_infos.as_ptr(),
        enabled_extension_count: enabled_extensions.len() as u32,
        pp_enabled_extension_names: enabled_extensions.as_ptr(),
        ..Default::default()
    };

    let device = instance.create_device(physical_device, &create_info, None)?;

    let vk_khr_surface = khr::Surface::new(entry, instance);
    let queue_families: Vec<_> = family_properties
        .iter()
        .enumerate()
        .map(|(family_index, family)| {
            let supports_present = match surface {
                Some(surface) => vk_khr_surface
                    .get_physical_device_surface_support(physical_device, family_index as u32, surface)
                    .unwrap_or(false),
                None => false,
            };
            QueueFamilyInfo {
                family_index: family_index as u32,
                queue_count: 1,
                properties: *family,
                supports_present,
            }
        })
        .collect();

    Device::from_handles(entry, instance, physical_device, device, &queue_families)
}

//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! The physical device selection process involves:
//! 1. Enumerating all available GPUs
//! 2. Resolving graphics and present queue families for the surface
//! 3. Checking for `VK_KHR_swapchain`, usable surface formats/present modes
//!    and sampler anisotropy
//! 4. Selecting the highest scoring GPU (discrete GPUs first)

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::QueueFamilies;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions the renderer cannot run without.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices discovered while scanning a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// First family that can present to the surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans family properties, asking `supports_present` for each index.
    ///
    /// Families with zero queues are skipped.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;

            if family.queue_count == 0 {
                continue;
            }

            if indices.graphics_family.is_none()
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics_family = Some(i);
            }

            if indices.present_family.is_none() && supports_present(i) {
                indices.present_family = Some(i);
            }

            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    /// Checks if both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the resolved pair, if complete.
    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics_family?,
            present: self.present_family?,
        })
    }
}

/// Returns the distinct family indices, graphics first.
///
/// One queue is created per entry when building the logical device.
pub fn unique_families(families: QueueFamilies) -> Vec<u32> {
    if families.is_split() {
        vec![families.graphics, families.present]
    } else {
        vec![families.graphics]
    }
}

/// Information about a selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved graphics and present families.
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Largest anisotropy the sampler may request.
    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Selects the most suitable physical device for rendering to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::Setup`] if enumeration fails and
/// [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    // SAFETY: the instance is live.
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| RhiError::setup("vkEnumeratePhysicalDevices", e))?;

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(info.properties.device_type, &info.properties.limits);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((info, score)) = selected else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}) - Score: {}",
        info.device_name(),
        info.device_type_name(),
        score
    );

    Ok(info)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    // SAFETY: `device` was enumerated from this instance.
    let (properties, features, memory_properties, family_properties) = unsafe {
        (
            instance.get_physical_device_properties(device),
            instance.get_physical_device_features(device),
            instance.get_physical_device_memory_properties(device),
            instance.get_physical_device_queue_family_properties(device),
        )
    };

    let name = properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown");

    let indices = QueueFamilyIndices::find(&family_properties, |i| {
        // SAFETY: valid family index for a live device and surface.
        unsafe { surface_loader.get_physical_device_surface_support(device, i, surface) }
            .unwrap_or(false)
    });

    let Some(queue_families) = indices.resolve() else {
        debug!(
            "GPU '{}' skipped: missing queue families (graphics={}, present={})",
            name,
            indices.graphics_family.is_some(),
            indices.present_family.is_some()
        );
        return None;
    };

    // SAFETY: `device` was enumerated from this instance.
    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
        .unwrap_or_default();
    if !supports_extensions(&extensions, REQUIRED_DEVICE_EXTENSIONS) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain not supported", name);
        return None;
    }

    let adequate = SwapchainSupportDetails::query(device, surface, surface_loader)
        .map(|support| support.is_adequate())
        .unwrap_or(false);
    if !adequate {
        debug!("GPU '{}' skipped: no surface formats or present modes", name);
        return None;
    }

    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{}' skipped: sampler anisotropy not supported", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

/// Checks that every name in `required` appears in `available`.
pub fn supports_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> bool {
    required.iter().all(|&req| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().ok() == Some(req))
    })
}

/// Scores a device. Higher is better; device type dominates.
pub fn rate_device(device_type: vk::PhysicalDeviceType, limits: &vk::PhysicalDeviceLimits) -> u32 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 1,
    };

    // Tie-break within a type by texture capability, capped below the type step.
    type_score + limits.max_image_dimension2_d.min(16_384) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut ext = vk::ExtensionProperties::default();
        for (dst, &src) in ext.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::ffi::c_char;
        }
        ext
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());
    }

    #[test]
    fn test_find_shared_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1)];
        let indices = QueueFamilyIndices::find(&families, |_| true);

        let resolved = indices.resolve().unwrap();
        assert_eq!(resolved.graphics, 0);
        assert_eq!(resolved.present, 0);
        assert_eq!(unique_families(resolved), vec![0]);
    }

    #[test]
    fn test_find_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i == 2);

        let resolved = indices.resolve().unwrap();
        assert_eq!(resolved.graphics, 0);
        assert_eq!(resolved.present, 2);
        assert_eq!(unique_families(resolved), vec![0, 2]);
    }

    #[test]
    fn test_find_skips_empty_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];
        let indices = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_find_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert_eq!(indices.graphics_family, Some(0));
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_supports_extensions() {
        let available = [
            extension(c"VK_KHR_maintenance1"),
            extension(ash::khr::swapchain::NAME),
        ];
        assert!(supports_extensions(&available, REQUIRED_DEVICE_EXTENSIONS));
        assert!(!supports_extensions(&available[..1], REQUIRED_DEVICE_EXTENSIONS));
        assert!(supports_extensions(&[], &[]));
    }

    #[test]
    fn test_discrete_gpu_preferred() {
        let small = vk::PhysicalDeviceLimits {
            max_image_dimension2_d: 4096,
            ..Default::default()
        };
        let large = vk::PhysicalDeviceLimits {
            max_image_dimension2_d: 32_768,
            ..Default::default()
        };

        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, &small);
        let integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &large);
        assert!(discrete > integrated);

        let bigger = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &large);
        let smaller = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &small);
        assert!(bigger > smaller);
    }
}

//! Swapchain parameter selection, creation, acquisition and presentation.
//!
//! # Overview
//!
//! - [`SwapchainSupportDetails`] - what the surface offers
//! - [`SwapchainParams`] - the parameters chosen from those details
//! - [`Swapchain`] - owns a `vk::SwapchainKHR` and the images it hands out
//! - [`AcquireOutcome`] / [`PresentOutcome`] - the recoverable results of
//!   acquire and present, kept apart from [`RhiError`]
//!
//! Image views, the depth target and framebuffers are not owned here; the
//! renderer's swapchain manager builds them on top of [`Swapchain::images`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::swapchain::{AcquireOutcome, Swapchain};
//! use ash::vk;
//!
//! # fn example(device: Arc<VulkanDevice>, semaphore: vk::Semaphore) -> Result<(), frameloop_rhi::RhiError> {
//! let swapchain = Swapchain::new(device, (800, 600))?;
//! match swapchain.acquire_next_image(Duration::from_secs(1), semaphore)? {
//!     AcquireOutcome::Acquired { image_index, .. } => { /* record and submit */ }
//!     AcquireOutcome::OutOfDate => { /* rebuild */ }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};

use crate::backend::{Backend, QueueFamilies};
use crate::error::{RhiError, RhiResult, timeout_nanos};

/// The only surface format the renderer accepts.
pub const REQUIRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Swapchain surface support details.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> ash::prelude::VkResult<Self> {
        // SAFETY: both handles are live and belong to the loader's instance.
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Parameters chosen for one swapchain build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainParams {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Both family indices when sharing is concurrent, otherwise unused.
    pub queue_family_indices: [u32; 2],
}

impl SwapchainParams {
    /// Runs the selection rules against what the surface reports.
    ///
    /// `framebuffer_size` is only used when the surface leaves the extent
    /// to the application.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoCompatibleSurfaceFormat`] if the surface does
    /// not offer [`REQUIRED_SURFACE_FORMAT`].
    pub fn select(
        support: &SwapchainSupportDetails,
        families: QueueFamilies,
        framebuffer_size: (u32, u32),
    ) -> RhiResult<Self> {
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, framebuffer_size);
        let image_count = determine_image_count(&support.capabilities);

        let sharing_mode = if families.is_split() {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                families.graphics, families.present
            );
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        Ok(Self {
            surface_format,
            present_mode,
            extent,
            image_count,
            pre_transform: support.capabilities.current_transform,
            sharing_mode,
            queue_family_indices: [families.graphics, families.present],
        })
    }

    /// Family indices to list in the create info.
    pub fn shared_families(&self) -> &[u32] {
        if self.sharing_mode == vk::SharingMode::CONCURRENT {
            &self.queue_family_indices
        } else {
            &[]
        }
    }
}

/// Result of a successful or recoverable acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available. `suboptimal` asks for a rebuild after present.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be rebuilt.
    OutOfDate,
}

/// Result of a successful or recoverable present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the swapchain should be rebuilt.
    Suboptimal,
    /// Not presented; the swapchain must be rebuilt.
    OutOfDate,
}

impl PresentOutcome {
    /// Whether this outcome calls for a swapchain rebuild.
    #[inline]
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Swapchain wrapper.
///
/// The images are owned by the presentation engine and go away with the
/// swapchain.
pub struct Swapchain<B: Backend> {
    /// Backend that created the swapchain.
    backend: Arc<B>,
    /// Swapchain handle
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain)
    images: Vec<vk::Image>,
    /// Parameters the swapchain was built with
    params: SwapchainParams,
}

impl<B: Backend> Swapchain<B> {
    /// Queries the surface, selects parameters and creates the swapchain.
    ///
    /// Always passes a null `old_swapchain`; callers destroy the previous
    /// swapchain before building a new one.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoCompatibleSurfaceFormat`] or [`RhiError::Setup`]
    /// naming the failing call.
    pub fn new(backend: Arc<B>, framebuffer_size: (u32, u32)) -> RhiResult<Self> {
        let support = backend
            .surface_support()
            .map_err(|e| RhiError::setup("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;

        let params = SwapchainParams::select(&support, backend.queue_families(), framebuffer_size)?;

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            params.extent.width,
            params.extent.height,
            params.surface_format.format,
            params.present_mode,
            params.image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(backend.surface())
            .min_image_count(params.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(params.sharing_mode)
            .queue_family_indices(params.shared_families())
            .pre_transform(params.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = backend
            .create_swapchain(&create_info)
            .map_err(|e| RhiError::setup("vkCreateSwapchainKHR", e))?;

        let images = match backend.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                backend.destroy_swapchain(swapchain);
                return Err(RhiError::setup("vkGetSwapchainImagesKHR", e));
            }
        };

        info!("Swapchain created with {} images", images.len());

        Ok(Self {
            backend,
            swapchain,
            images,
            params,
        })
    }

    /// Acquires the next image, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Out-of-date is reported as [`AcquireOutcome::OutOfDate`], not as an
    /// error. An expired wait is [`RhiError::Timeout`].
    pub fn acquire_next_image(
        &self,
        timeout: Duration,
        semaphore: vk::Semaphore,
    ) -> RhiResult<AcquireOutcome> {
        match self
            .backend
            .acquire_next_image(self.swapchain, timeout_nanos(timeout), semaphore)
        {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RhiError::wait("vkAcquireNextImageKHR", e, timeout)),
        }
    }

    /// Presents `image_index` on `queue` once `wait_semaphore` is signaled.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        match self
            .backend
            .queue_present(queue, self.swapchain, image_index, wait_semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RhiError::runtime("vkQueuePresentKHR", e)),
        }
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.params.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.params.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.params.present_mode
    }

    #[inline]
    pub fn params(&self) -> &SwapchainParams {
        &self.params
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

impl<B: Backend> Drop for Swapchain<B> {
    fn drop(&mut self) {
        self.backend.destroy_swapchain(self.swapchain);
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.params.extent.width,
            self.params.extent.height,
            self.images.len()
        );
    }
}

/// Picks [`REQUIRED_SURFACE_FORMAT`] or fails; there is no fallback.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|&f| f == REQUIRED_SURFACE_FORMAT)
        .ok_or(RhiError::NoCompatibleSurfaceFormat)
}

/// Prefers MAILBOX; falls back to FIFO, which is always available.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode (triple buffering)");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's current extent unless it is the `u32::MAX` sentinel,
/// in which case the framebuffer size is clamped to the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    (width, height): (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// One more than the minimum, capped by a nonzero maximum.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count.saturating_add(1);

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_exact_match() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            REQUIRED_SURFACE_FORMAT,
        ];

        assert_eq!(
            choose_surface_format(&formats).unwrap(),
            REQUIRED_SURFACE_FORMAT
        );
    }

    #[test]
    fn test_choose_surface_format_has_no_fallback() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];

        assert!(matches!(
            choose_surface_format(&formats),
            Err(RhiError::NoCompatibleSurfaceFormat)
        ));
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let extent = choose_extent(&capabilities(2, 0), (800, 600));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, (3000, 50));
        assert_eq!((extent.width, extent.height), (2000, 100));

        let extent = choose_extent(&capabilities, (800, 600));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        assert_eq!(determine_image_count(&capabilities(2, 3)), 3);
        assert_eq!(determine_image_count(&capabilities(2, 8)), 3);
        assert_eq!(determine_image_count(&capabilities(2, 0)), 3);
        assert_eq!(determine_image_count(&capabilities(3, 3)), 3);
    }

    #[test]
    fn test_params_sharing_mode() {
        let support = SwapchainSupportDetails {
            capabilities: capabilities(2, 0),
            formats: vec![REQUIRED_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let same = SwapchainParams::select(
            &support,
            QueueFamilies {
                graphics: 0,
                present: 0,
            },
            (800, 600),
        )
        .unwrap();
        assert_eq!(same.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(same.shared_families().is_empty());

        let split = SwapchainParams::select(
            &support,
            QueueFamilies {
                graphics: 0,
                present: 1,
            },
            (800, 600),
        )
        .unwrap();
        assert_eq!(split.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(split.shared_families(), &[0, 1]);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            ..Default::default()
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            formats: vec![vk::SurfaceFormatKHR::default()],
            ..Default::default()
        };
        assert!(!no_modes.is_adequate());
    }

    #[test]
    fn test_acquire_and_present_outcomes() {
        let backend = Arc::new(MockBackend::new());
        let swapchain = Swapchain::new(Arc::clone(&backend), (800, 600)).unwrap();
        assert_eq!(swapchain.image_count(), 3);

        backend.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        backend.push_acquire_result(Ok((1, true)));
        let timeout = Duration::from_millis(5);
        assert_eq!(
            swapchain
                .acquire_next_image(timeout, vk::Semaphore::null())
                .unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            swapchain
                .acquire_next_image(timeout, vk::Semaphore::null())
                .unwrap(),
            AcquireOutcome::Acquired {
                image_index: 1,
                suboptimal: true
            }
        );

        backend.push_acquire_result(Err(vk::Result::TIMEOUT));
        assert!(matches!(
            swapchain.acquire_next_image(timeout, vk::Semaphore::null()),
            Err(RhiError::Timeout { .. })
        ));

        backend.push_present_result(Ok(true));
        backend.push_present_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        backend.push_present_result(Err(vk::Result::ERROR_DEVICE_LOST));
        let queue = backend.present_queue();
        assert_eq!(
            swapchain.present(queue, 1, vk::Semaphore::null()).unwrap(),
            PresentOutcome::Suboptimal
        );
        assert_eq!(
            swapchain.present(queue, 1, vk::Semaphore::null()).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(
            swapchain
                .present(queue, 1, vk::Semaphore::null())
                .unwrap_err()
                .is_device_lost()
        );

        drop(swapchain);
        assert_eq!(backend.live(ObjectKind::Swapchain), 0);
    }
}

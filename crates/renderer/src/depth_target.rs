//! Depth target management.
//!
//! This module creates the single depth attachment shared by every swapchain
//! framebuffer. Its extent follows the swapchain, so it is rebuilt together
//! with the swapchain.
//!
//! # Overview
//!
//! - [`find_depth_format`] picks the first supported candidate format
//! - [`DepthTarget`] owns the depth image, its memory and its view

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use frameloop_rhi::backend::Backend;
use frameloop_rhi::image::{Image, ImageDesc, ImageView};
use frameloop_rhi::{RhiError, RhiResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Returns the first candidate whose optimal-tiling features support use as
/// a depth/stencil attachment.
///
/// # Errors
///
/// Returns [`RhiError::Setup`] for `vkGetPhysicalDeviceFormatProperties`
/// with `ERROR_FORMAT_NOT_SUPPORTED` if no candidate qualifies.
pub fn find_depth_format<B: Backend>(backend: &B) -> RhiResult<vk::Format> {
    let format = DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            backend
                .format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RhiError::setup(
            "vkGetPhysicalDeviceFormatProperties",
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        ))?;

    debug!("Selected depth format {:?}", format);
    Ok(format)
}

/// Whether `format` carries a stencil component.
#[inline]
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Image aspect covered by a view of a depth `format`.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Depth image, memory and view sized to the swapchain.
///
/// # Resource Destruction
///
/// Fields drop in declaration order: the view first, then the image, then
/// the image's memory.
pub struct DepthTarget<B: Backend> {
    view: ImageView<B>,
    image: Image<B>,
}

impl<B: Backend> DepthTarget<B> {
    /// Creates a device-local depth attachment of `extent` in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ResourceCreation`] or
    /// [`RhiError::OutOfMemoryType`] if the image or its view cannot be
    /// created. Nothing is leaked on failure.
    pub fn new(backend: Arc<B>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        let image = Image::new(
            backend,
            ImageDesc::device_local(
                extent,
                format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
        )?;
        let view = image.create_view(depth_aspect(format))?;

        info!(
            "Depth target created: {}x{}, format {:?}",
            extent.width, extent.height, format
        );

        Ok(Self { view, image })
    }

    /// Returns the depth view attached to every framebuffer.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_find_depth_format_prefers_d32() {
        let backend = MockBackend::new();
        assert_eq!(find_depth_format(&backend).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_find_depth_format_falls_through_candidates() {
        let backend = MockBackend::new();
        backend.set_format_features(vk::Format::D32_SFLOAT, vk::FormatFeatureFlags::empty());
        backend.set_format_features(
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::FormatFeatureFlags::SAMPLED_IMAGE,
        );

        assert_eq!(
            find_depth_format(&backend).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
    }

    #[test]
    fn test_find_depth_format_none_supported() {
        let backend = MockBackend::new();
        for format in DEPTH_FORMAT_CANDIDATES {
            backend.set_format_features(format, vk::FormatFeatureFlags::empty());
        }

        let err = find_depth_format(&backend).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Setup {
                operation: "vkGetPhysicalDeviceFormatProperties",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            }
        ));
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_depth_target_lifecycle() {
        let backend = Arc::new(MockBackend::new());
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        let depth = DepthTarget::new(Arc::clone(&backend), extent, vk::Format::D32_SFLOAT).unwrap();
        assert_eq!(depth.extent(), extent);
        assert_eq!(depth.format(), vk::Format::D32_SFLOAT);
        assert_eq!(backend.live(ObjectKind::Image), 1);
        assert_eq!(backend.live(ObjectKind::ImageView), 1);

        drop(depth);
        assert_eq!(backend.live_objects(), 0);
        assert!(backend.violations().is_empty());
    }
}

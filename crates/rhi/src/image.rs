//! Images, image views and samplers.
//!
//! # Overview
//!
//! - [`ImageDesc`] describes a 2D, single-mip, single-layer image
//! - [`Image`] owns a `vk::Image` and its dedicated memory
//! - [`ImageView`] owns a view over any image, including swapchain images
//! - [`Sampler`] owns a sampler object
//!
//! Destroying an [`Image`] releases the image handle first and the memory
//! second. Views must be dropped before the image they look at.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};
use crate::memory::DeviceMemory;

/// Parameters for a 2D image with one mip level and one array layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    /// Memory properties the backing allocation must carry.
    pub properties: vk::MemoryPropertyFlags,
}

impl ImageDesc {
    /// Device-local, optimally tiled image.
    pub fn device_local(
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            extent,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }
}

/// Image with its own bound memory.
///
/// Created in `UNDEFINED` layout. Layout tracking is left to the caller.
pub struct Image<B: Backend> {
    backend: Arc<B>,
    image: vk::Image,
    memory: DeviceMemory<B>,
    desc: ImageDesc,
}

impl<B: Backend> Image<B> {
    /// Creates the image and binds fresh memory to it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ResourceCreation`] naming the failing call, or
    /// [`RhiError::OutOfMemoryType`]. Nothing is leaked on failure.
    pub fn new(backend: Arc<B>, desc: ImageDesc) -> RhiResult<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = backend
            .create_image(&image_info)
            .map_err(|e| RhiError::resource("vkCreateImage", e))?;

        let requirements = backend.image_memory_requirements(image);
        let memory = match DeviceMemory::allocate(Arc::clone(&backend), requirements, desc.properties)
        {
            Ok(memory) => memory,
            Err(e) => {
                backend.destroy_image(image);
                return Err(e);
            }
        };

        if let Err(e) = backend.bind_image_memory(image, memory.handle(), 0) {
            backend.destroy_image(image);
            return Err(RhiError::resource("vkBindImageMemory", e));
        }

        debug!(
            "Created image: {}x{} ({:?})",
            desc.extent.width, desc.extent.height, desc.format
        );

        Ok(Self {
            backend,
            image,
            memory,
            desc,
        })
    }

    /// Creates a 2D view over this image.
    pub fn create_view(&self, aspect: vk::ImageAspectFlags) -> RhiResult<ImageView<B>> {
        ImageView::new(Arc::clone(&self.backend), self.image, self.desc.format, aspect)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn memory(&self) -> &DeviceMemory<B> {
        &self.memory
    }
}

impl<B: Backend> Drop for Image<B> {
    fn drop(&mut self) {
        self.backend.destroy_image(self.image);
        debug!(
            "Destroyed image: {}x{}",
            self.desc.extent.width, self.desc.extent.height
        );
    }
}

/// Subresource range covering the single mip and layer every image here has.
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// 2D image view wrapper.
pub struct ImageView<B: Backend> {
    backend: Arc<B>,
    view: vk::ImageView,
}

impl<B: Backend> ImageView<B> {
    /// Creates a 2D view with identity swizzle.
    ///
    /// Works for any image, including ones the swapchain owns.
    pub fn new(
        backend: Arc<B>,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(full_subresource_range(aspect));

        let view = backend
            .create_image_view(&view_info)
            .map_err(|e| RhiError::resource("vkCreateImageView", e))?;

        Ok(Self { backend, view })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl<B: Backend> Drop for ImageView<B> {
    fn drop(&mut self) {
        self.backend.destroy_image_view(self.view);
    }
}

/// Sampler wrapper.
pub struct Sampler<B: Backend> {
    backend: Arc<B>,
    sampler: vk::Sampler,
}

impl<B: Backend> Sampler<B> {
    /// Linear, repeating sampler with anisotropy at the device maximum.
    pub fn linear_repeat(backend: Arc<B>) -> RhiResult<Self> {
        let max_anisotropy = backend.max_sampler_anisotropy();

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy.max(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = backend
            .create_sampler(&info)
            .map_err(|e| RhiError::setup("vkCreateSampler", e))?;

        debug!("Created sampler (max anisotropy {})", max_anisotropy);

        Ok(Self { backend, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl<B: Backend> Drop for Sampler<B> {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    fn depth_desc() -> ImageDesc {
        ImageDesc::device_local(
            vk::Extent2D {
                width: 64,
                height: 32,
            },
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    #[test]
    fn test_image_and_view_lifecycle() {
        let backend = Arc::new(MockBackend::new());
        {
            let image = Image::new(Arc::clone(&backend), depth_desc()).unwrap();
            let _view = image.create_view(vk::ImageAspectFlags::DEPTH).unwrap();
            assert_eq!(image.extent().width, 64);
            assert_eq!(backend.live(ObjectKind::Image), 1);
            assert_eq!(backend.live(ObjectKind::ImageView), 1);
            assert_eq!(backend.live(ObjectKind::Memory), 1);
        }
        assert_eq!(backend.live_objects(), 0);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_bind_failure_releases_image() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("vkBindImageMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let result = Image::new(Arc::clone(&backend), depth_desc());
        assert!(matches!(
            result,
            Err(RhiError::ResourceCreation {
                operation: "vkBindImageMemory",
                ..
            })
        ));
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn test_full_subresource_range() {
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_sampler_lifecycle() {
        let backend = Arc::new(MockBackend::new());
        let sampler = Sampler::linear_repeat(Arc::clone(&backend)).unwrap();
        assert_ne!(sampler.handle(), vk::Sampler::null());
        drop(sampler);
        assert_eq!(backend.destroyed(ObjectKind::Sampler), 1);
    }
}

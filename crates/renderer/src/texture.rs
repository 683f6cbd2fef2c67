//! Sampled texture.
//!
//! The renderer samples one procedural RGBA8 checkerboard. Upload goes
//! through a staging buffer and two layout transitions:
//!
//! ```text
//! UNDEFINED -> TRANSFER_DST_OPTIMAL -> (copy) -> SHADER_READ_ONLY_OPTIMAL
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::info;

use frameloop_rhi::backend::Backend;
use frameloop_rhi::image::{Image, ImageDesc, ImageView, Sampler};
use frameloop_rhi::{RhiError, RhiResult};

use crate::resource_pool::ResourcePool;

/// Format of uploaded texture data.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Edge length of the checkerboard, in texels.
pub const CHECKERBOARD_SIZE: u32 = 256;

/// Edge length of one checkerboard cell, in texels.
pub const CHECKER_CELL: u32 = 32;

const LIGHT: [u8; 4] = [0xee, 0xee, 0xee, 0xff];
const DARK: [u8; 4] = [0x33, 0x33, 0x33, 0xff];

/// Generates tightly packed RGBA8 texels of a `size` x `size` checkerboard.
pub fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let cell = cell.max(1);
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            if (x / cell + y / cell) % 2 == 0 {
                LIGHT
            } else {
                DARK
            }
        })
        .collect()
}

/// Device-local texture with its view and sampler.
///
/// Fields drop in declaration order: sampler, view, image.
pub struct Texture<B: Backend> {
    sampler: Sampler<B>,
    view: ImageView<B>,
    image: Image<B>,
}

impl<B: Backend> Texture<B> {
    /// Uploads `pixels` (RGBA8, tightly packed) as a sampled image.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::TextureDataSize`] if `pixels` does not hold
    /// exactly `extent` texels, and any creation or submission failure.
    pub fn upload(pool: &ResourcePool<B>, extent: vk::Extent2D, pixels: &[u8]) -> RhiResult<Self> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(RhiError::TextureDataSize {
                len: pixels.len(),
                expected,
            });
        }

        let staging = pool.create_staging_buffer(pixels)?;
        let image = pool.create_image(ImageDesc::device_local(
            extent,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ))?;

        pool.transition_image_layout(
            image.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        pool.copy_buffer_to_image(staging.handle(), image.handle(), extent)?;
        pool.transition_image_layout(
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        drop(staging);

        let view = image.create_view(vk::ImageAspectFlags::COLOR)?;
        let sampler = Sampler::linear_repeat(Arc::clone(pool.backend()))?;

        info!(
            "Texture uploaded: {}x{} {:?}",
            extent.width, extent.height, TEXTURE_FORMAT
        );

        Ok(Self {
            sampler,
            view,
            image,
        })
    }

    /// Uploads the default checkerboard.
    pub fn checkerboard(pool: &ResourcePool<B>) -> RhiResult<Self> {
        let extent = vk::Extent2D {
            width: CHECKERBOARD_SIZE,
            height: CHECKERBOARD_SIZE,
        };
        Self::upload(pool, extent, &checkerboard(CHECKERBOARD_SIZE, CHECKER_CELL))
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

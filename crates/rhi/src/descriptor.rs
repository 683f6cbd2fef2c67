//! Descriptor set layouts, pools and binding helpers.
//!
//! # Overview
//!
//! - [`DescriptorSetLayout`] defines which resources a shader sees
//! - [`DescriptorPool`] allocates sets; sets are released with the pool
//! - [`DescriptorBindingBuilder`] builds the two binding kinds in use
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX)],
//! )?;
//!
//! let pool = DescriptorPool::new(
//!     device.clone(),
//!     2,
//!     &[vk::DescriptorPoolSize::default()
//!         .ty(vk::DescriptorType::UNIFORM_BUFFER)
//!         .descriptor_count(2)],
//! )?;
//! let sets = pool.allocate(&[layout.handle(), layout.handle()])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout<B: Backend> {
    /// Backend that created the layout.
    backend: Arc<B>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
}

impl<B: Backend> DescriptorSetLayout<B> {
    /// Creates a new descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if layout creation fails.
    pub fn new(backend: Arc<B>, bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> RhiResult<Self> {
        let layout = backend
            .create_descriptor_set_layout(bindings)
            .map_err(|e| RhiError::setup("vkCreateDescriptorSetLayout", e))?;

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { backend, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl<B: Backend> Drop for DescriptorSetLayout<B> {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_set_layout(self.layout);
        debug!("Destroyed descriptor set layout");
    }
}

/// Descriptor pool wrapper.
///
/// Sets allocated from the pool are not freed individually; destroying the
/// pool releases them all.
pub struct DescriptorPool<B: Backend> {
    backend: Arc<B>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl<B: Backend> DescriptorPool<B> {
    /// Creates a pool holding up to `max_sets` sets.
    pub fn new(
        backend: Arc<B>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let pool = backend
            .create_descriptor_pool(max_sets, pool_sizes)
            .map_err(|e| RhiError::setup("vkCreateDescriptorPool", e))?;

        debug!("Created descriptor pool (max {} sets)", max_sets);

        Ok(Self {
            backend,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per entry in `layouts`.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        self.backend
            .allocate_descriptor_sets(self.pool, layouts)
            .map_err(|e| RhiError::setup("vkAllocateDescriptorSets", e))
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl<B: Backend> Drop for DescriptorPool<B> {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_pool(self.pool);
        debug!("Destroyed descriptor pool");
    }
}

/// Helper for building descriptor set layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    /// Creates a uniform buffer binding.
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// Creates a combined image sampler binding.
    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_descriptor_binding_builder_combined_image_sampler() {
        let binding =
            DescriptorBindingBuilder::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(binding.binding, 1);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_allocates_one_set_per_layout() {
        let backend = Arc::new(MockBackend::new());
        let layout = DescriptorSetLayout::new(
            Arc::clone(&backend),
            &[DescriptorBindingBuilder::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX,
            )],
        )
        .unwrap();
        let pool = DescriptorPool::new(
            Arc::clone(&backend),
            3,
            &[vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(3)],
        )
        .unwrap();

        let sets = pool
            .allocate(&[layout.handle(), layout.handle(), layout.handle()])
            .unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(pool.max_sets(), 3);

        drop(pool);
        drop(layout);
        assert_eq!(backend.destroyed(ObjectKind::DescriptorPool), 1);
        assert_eq!(backend.destroyed(ObjectKind::DescriptorSetLayout), 1);
    }
}

//! GPU buffer management.
//!
//! This module handles vertex, index, uniform, and staging buffers. Each
//! buffer owns a dedicated [`DeviceMemory`] allocation whose memory type is
//! chosen explicitly from the requested property flags.
//!
//! # Overview
//!
//! - [`BufferUsage`] names the common roles and their usage/memory flags
//! - [`Buffer`] wraps a `vk::Buffer` together with its bound memory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::buffer::{Buffer, BufferUsage};
//! use frameloop_rhi::device::VulkanDevice;
//!
//! # fn example(device: Arc<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let mut staging = Buffer::with_usage(device, BufferUsage::Staging, 64)?;
//! staging.map_persistent()?;
//! staging.write(0, &[1.0f32; 16])?;
//! # Ok(())
//! # }
//! ```

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};
use crate::memory::DeviceMemory;

/// Buffer usage type.
///
/// Each role maps to Vulkan usage flags and the memory properties the
/// backing allocation must have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer, filled through a staging copy
    Vertex,
    /// Index buffer, filled through a staging copy
    Index,
    /// Uniform buffer, written by the host every frame
    Uniform,
    /// Staging buffer, source of one-shot transfers
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Memory properties the backing allocation must carry.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::Uniform | BufferUsage::Staging => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// GPU buffer with its own bound memory.
///
/// Field order matters: the buffer handle is destroyed in [`Drop`] before
/// `memory` is released.
pub struct Buffer<B: Backend> {
    /// Backend that created the buffer.
    backend: Arc<B>,
    /// Vulkan buffer handle.
    buffer: vk::Buffer,
    /// Memory bound at offset 0.
    memory: DeviceMemory<B>,
    /// Requested size in bytes.
    size: vk::DeviceSize,
}

impl<B: Backend> Buffer<B> {
    /// Creates a buffer of `size` bytes and binds fresh memory to it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ResourceCreation`] naming the failing call, or
    /// [`RhiError::OutOfMemoryType`] if no memory type has `properties`.
    /// Nothing is leaked on failure.
    pub fn new(
        backend: Arc<B>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = backend
            .create_buffer(&buffer_info)
            .map_err(|e| RhiError::resource("vkCreateBuffer", e))?;

        let requirements = backend.buffer_memory_requirements(buffer);
        let memory = match DeviceMemory::allocate(Arc::clone(&backend), requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                backend.destroy_buffer(buffer);
                return Err(e);
            }
        };

        if let Err(e) = backend.bind_buffer_memory(buffer, memory.handle(), 0) {
            backend.destroy_buffer(buffer);
            return Err(RhiError::resource("vkBindBufferMemory", e));
        }

        debug!("Created buffer: {} bytes, usage {:?}", size, usage);

        Ok(Self {
            backend,
            buffer,
            memory,
            size,
        })
    }

    /// Creates a buffer for one of the common [`BufferUsage`] roles.
    pub fn with_usage(
        backend: Arc<B>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        Self::new(backend, size, usage.to_vk_usage(), usage.memory_properties())
    }

    /// Maps the buffer memory for the lifetime of the buffer.
    ///
    /// Calling this again returns the existing mapping.
    pub fn map_persistent(&mut self) -> RhiResult<NonNull<u8>> {
        self.memory.map()
    }

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NotMapped`] if [`Buffer::map_persistent`] was never
    /// called, or [`RhiError::WriteOutOfBounds`] if the write would exceed the
    /// buffer size.
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size: self.size,
            });
        }

        let mapped = self.memory.mapped_ptr().ok_or(RhiError::NotMapped)?;

        // SAFETY: the mapping covers the whole allocation, which is at least
        // `self.size` bytes, and the range was bounds-checked above.
        unsafe {
            let dst = mapped.as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Copies a slice of plain-old-data values into the mapped memory.
    pub fn write<T: bytemuck::Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> RhiResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the memory bound to this buffer.
    #[inline]
    pub fn memory(&self) -> &DeviceMemory<B> {
        &self.memory
    }
}

impl<B: Backend> Drop for Buffer<B> {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.buffer);
        debug!("Destroyed buffer ({} bytes)", self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
    }

    #[test]
    fn test_buffer_usage_memory_properties() {
        assert_eq!(
            BufferUsage::Vertex.memory_properties(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
        assert!(
            BufferUsage::Uniform
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        );
    }

    #[test]
    fn test_write_requires_mapping() {
        let backend = Arc::new(MockBackend::new());
        let mut buffer = Buffer::with_usage(backend, BufferUsage::Staging, 16).unwrap();

        assert!(matches!(
            buffer.write_bytes(0, &[1, 2, 3]),
            Err(RhiError::NotMapped)
        ));

        buffer.map_persistent().unwrap();
        buffer.write_bytes(0, &[1, 2, 3]).unwrap();
        buffer.write(4, &[7u32, 8u32, 9u32]).unwrap();
    }

    #[test]
    fn test_write_out_of_bounds() {
        let backend = Arc::new(MockBackend::new());
        let mut buffer = Buffer::with_usage(backend, BufferUsage::Uniform, 8).unwrap();
        buffer.map_persistent().unwrap();

        let err = buffer.write_bytes(4, &[0; 8]).unwrap_err();
        assert!(matches!(
            err,
            RhiError::WriteOutOfBounds {
                offset: 4,
                len: 8,
                size: 8,
            }
        ));
    }

    #[test]
    fn test_drop_releases_buffer_and_memory() {
        let backend = Arc::new(MockBackend::new());
        {
            let mut buffer =
                Buffer::with_usage(Arc::clone(&backend), BufferUsage::Uniform, 64).unwrap();
            buffer.map_persistent().unwrap();
            assert_eq!(backend.live(ObjectKind::Buffer), 1);
            assert_eq!(backend.live(ObjectKind::Memory), 1);
        }
        assert_eq!(backend.live(ObjectKind::Buffer), 0);
        assert_eq!(backend.live(ObjectKind::Memory), 0);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_missing_memory_type_leaks_nothing() {
        let backend = Arc::new(MockBackend::new());
        backend.set_memory_types(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let result = Buffer::with_usage(Arc::clone(&backend), BufferUsage::Staging, 32);
        assert!(matches!(result, Err(RhiError::OutOfMemoryType { .. })));
        assert_eq!(backend.live(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_allocation_failure_names_call() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let result = Buffer::with_usage(Arc::clone(&backend), BufferUsage::Vertex, 32);
        assert!(matches!(
            result,
            Err(RhiError::ResourceCreation {
                operation: "vkAllocateMemory",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            })
        ));
        assert_eq!(backend.live(ObjectKind::Buffer), 0);
    }
}

//! Device memory selection and ownership.
//!
//! Every buffer and image gets its own dedicated allocation. The memory type
//! is picked by [`find_memory_type`]: the first type that the resource accepts
//! and that carries every requested property flag.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};

/// Finds the index of a memory type allowed by `type_bits` that has all of
/// `required` set.
///
/// # Errors
///
/// Returns [`RhiError::OutOfMemoryType`] if no such type exists.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RhiError::OutOfMemoryType {
            type_bits,
            properties: required,
        })
}

/// A dedicated device memory allocation.
///
/// Freed on drop, after being unmapped if it was mapped.
pub struct DeviceMemory<B: Backend> {
    backend: Arc<B>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
}

impl<B: Backend> DeviceMemory<B> {
    /// Allocates memory that satisfies `requirements` and has `properties`.
    pub fn allocate(
        backend: Arc<B>,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let memory_type = find_memory_type(
            &backend.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )?;

        let memory = backend
            .allocate_memory(requirements.size, memory_type)
            .map_err(|e| RhiError::resource("vkAllocateMemory", e))?;

        debug!(
            "Allocated {} bytes from memory type {} ({:?})",
            requirements.size, memory_type, properties
        );

        Ok(Self {
            backend,
            memory,
            size: requirements.size,
            mapped: None,
        })
    }

    /// Maps the whole allocation, or returns the existing mapping.
    pub fn map(&mut self) -> RhiResult<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        let ptr = self
            .backend
            .map_memory(self.memory, 0, self.size)
            .map_err(|e| RhiError::resource("vkMapMemory", e))?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Pointer to the start of the mapping, if mapped.
    #[inline]
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl<B: Backend> Drop for DeviceMemory<B> {
    fn drop(&mut self) {
        if self.mapped.take().is_some() {
            self.backend.unmap_memory(self.memory);
        }
        self.backend.free_memory(self.memory);
    }
}

// SAFETY: the mapped pointer refers to memory owned by this allocation, and
// the backend itself is Send + Sync.
unsafe impl<B: Backend> Send for DeviceMemory<B> {}
unsafe impl<B: Backend> Sync for DeviceMemory<B> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_memory_type_requires_all_flags() {
        let props = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let err = find_memory_type(&props, 0b11, host).unwrap_err();
        assert!(matches!(
            err,
            RhiError::OutOfMemoryType {
                type_bits: 0b11,
                properties,
            } if properties == host
        ));
    }

    #[test]
    fn test_find_memory_type_excluded_by_mask() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }
}

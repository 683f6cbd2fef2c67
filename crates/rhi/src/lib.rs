//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides typed, RAII-managed access to a Vulkan device through
//! the [`Backend`](backend::Backend) trait. It handles:
//! - Instance, surface and device creation ([`device::VulkanDevice`])
//! - Swapchain parameter selection and acquire/present outcomes
//! - Buffers, images and their dedicated memory
//! - Command buffer recording
//! - Render pass, pipeline and descriptor objects
//! - Synchronization primitives
//! - SPIR-V shader binary loading
//!
//! With the `testing` feature (always on for this crate's own tests),
//! [`mock::MockBackend`] stands in for a GPU.

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use backend::Backend;
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;

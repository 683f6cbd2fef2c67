//! RHI-specific error types.

use std::path::PathBuf;
use std::time::Duration;

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
///
/// Every variant that wraps a `vk::Result` also names the Vulkan entry point
/// that produced it, so callers can tell failures apart by kind and origin.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Construction of a long-lived object failed before the frame loop started
    #[error("{operation} failed during setup: {result}")]
    Setup {
        operation: &'static str,
        result: vk::Result,
    },

    /// The backend could not create or back a buffer or image
    #[error("{operation} could not create resource: {result}")]
    ResourceCreation {
        operation: &'static str,
        result: vk::Result,
    },

    /// No memory type satisfies both the resource and the requested properties
    #[error("No memory type in mask {type_bits:#b} has properties {properties:?}")]
    OutOfMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// A host write would run past the end of a buffer
    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    WriteOutOfBounds {
        offset: u64,
        len: usize,
        size: u64,
    },

    /// Texture pixel data does not match the image extent
    #[error("Texture data is {len} bytes, expected {expected} for the image extent")]
    TextureDataSize { len: usize, expected: usize },

    /// A host write targeted memory that is not mapped
    #[error("Buffer memory is not mapped")]
    NotMapped,

    /// The surface does not offer B8G8R8A8_SRGB with SRGB_NONLINEAR
    #[error("Surface offers no B8G8R8A8_SRGB / SRGB_NONLINEAR format")]
    NoCompatibleSurfaceFormat,

    /// Layout pair missing from the transition table
    #[error("Unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// The device was lost; this is not recovered from
    #[error("Device lost during {operation}")]
    DeviceLost { operation: &'static str },

    /// A bounded wait expired
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Any other failure of a per-frame backend call
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader binary missing or unreadable
    #[error("Shader binary {path} not found: {source}")]
    ShaderNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Shader binary is not valid SPIR-V
    #[error("Shader binary {path} is not valid SPIR-V: {source}")]
    InvalidShader {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    Surface(String),
}

impl RhiError {
    /// Wraps a construction failure.
    #[inline]
    pub fn setup(operation: &'static str, result: vk::Result) -> Self {
        Self::Setup { operation, result }
    }

    /// Wraps a buffer/image/memory creation failure.
    #[inline]
    pub fn resource(operation: &'static str, result: vk::Result) -> Self {
        Self::ResourceCreation { operation, result }
    }

    /// Classifies a failure of a call made while frames are in flight.
    pub fn runtime(operation: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { operation },
            result => Self::Vulkan { operation, result },
        }
    }

    /// Classifies a failure of a bounded wait.
    pub fn wait(operation: &'static str, result: vk::Result, timeout: Duration) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout { operation, timeout },
            result => Self::runtime(operation, result),
        }
    }

    /// Returns `true` for errors caused by losing the device.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost { .. })
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

/// Converts a `Duration` into the nanosecond count Vulkan waits take.
pub(crate) fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

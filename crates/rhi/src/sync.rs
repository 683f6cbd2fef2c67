//! Synchronization primitives.
//!
//! This module provides RAII wrappers for the two Vulkan synchronization
//! objects the frame loop needs:
//! - [`Semaphore`] - GPU-to-GPU ordering between acquire, submit and present
//! - [`Fence`] - GPU-to-CPU completion, always waited on with a bound
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Signaled so the first wait on it returns immediately
//! let in_flight = Fence::new(device, true)?;
//!
//! in_flight.wait(Duration::from_secs(5))?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult, timeout_nanos};

/// Semaphore wrapper.
///
/// Created unsignaled and destroyed on drop.
pub struct Semaphore<B: Backend> {
    backend: Arc<B>,
    semaphore: vk::Semaphore,
}

impl<B: Backend> Semaphore<B> {
    /// Creates a new unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if creation fails.
    pub fn new(backend: Arc<B>) -> RhiResult<Self> {
        let semaphore = backend
            .create_semaphore()
            .map_err(|e| RhiError::setup("vkCreateSemaphore", e))?;

        Ok(Self { backend, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<B: Backend> Drop for Semaphore<B> {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.semaphore);
    }
}

/// Fence wrapper.
///
/// Waits are always bounded; an expired wait surfaces as
/// [`RhiError::Timeout`] instead of blocking forever.
pub struct Fence<B: Backend> {
    backend: Arc<B>,
    fence: vk::Fence,
}

impl<B: Backend> Fence<B> {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `backend` - The backend that owns the fence
    /// * `signaled` - If true, the fence starts signaled so the first wait
    ///   on it does not block
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if creation fails.
    pub fn new(backend: Arc<B>, signaled: bool) -> RhiResult<Self> {
        let fence = backend
            .create_fence(signaled)
            .map_err(|e| RhiError::setup("vkCreateFence", e))?;

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { backend, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` expires.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] when the bound expires and
    /// [`RhiError::DeviceLost`] if the device was lost.
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        self.backend
            .wait_for_fence(self.fence, timeout_nanos(timeout))
            .map_err(|e| RhiError::wait("vkWaitForFences", e, timeout))
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue when this is called.
    pub fn reset(&self) -> RhiResult<()> {
        self.backend
            .reset_fence(self.fence)
            .map_err(|e| RhiError::runtime("vkResetFences", e))
    }

    /// Non-blocking check of the fence state.
    pub fn is_signaled(&self) -> bool {
        matches!(self.backend.fence_status(self.fence), Ok(true))
    }
}

impl<B: Backend> Drop for Fence<B> {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence<MockBackend>>();
        assert_send_sync::<Semaphore<MockBackend>>();
    }

    #[test]
    fn test_signaled_fence_waits_immediately() {
        let backend = Arc::new(MockBackend::new());
        let fence = Fence::new(Arc::clone(&backend), true).unwrap();

        assert!(fence.is_signaled());
        fence.wait(Duration::from_millis(1)).unwrap();
        fence.reset().unwrap();
        assert!(!fence.is_signaled());
        assert_eq!(backend.blocked_waits(), 0);
    }

    #[test]
    fn test_hung_fence_times_out() {
        let backend = Arc::new(MockBackend::new());
        let fence = Fence::new(Arc::clone(&backend), false).unwrap();
        backend.hang_fences(true);

        let timeout = Duration::from_millis(20);
        let err = fence.wait(timeout).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Timeout {
                operation: "vkWaitForFences",
                timeout: t,
            } if t == timeout
        ));
    }

    #[test]
    fn test_drop_destroys_handles() {
        let backend = Arc::new(MockBackend::new());
        {
            let _fence = Fence::new(Arc::clone(&backend), true).unwrap();
            let _semaphore = Semaphore::new(Arc::clone(&backend)).unwrap();
            assert_eq!(backend.live(ObjectKind::Fence), 1);
            assert_eq!(backend.live(ObjectKind::Semaphore), 1);
        }
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn test_semaphore_creation_failure_is_setup_error() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("vkCreateSemaphore", vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let result = Semaphore::new(backend);
        assert!(matches!(
            result,
            Err(RhiError::Setup {
                operation: "vkCreateSemaphore",
                ..
            })
        ));
    }
}

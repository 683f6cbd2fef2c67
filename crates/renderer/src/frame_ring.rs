//! Frame synchronization ring.
//!
//! This module provides [`FrameRing`], a fixed set of N frame slots handed
//! out round-robin. Each [`FrameSlot`] owns the synchronization primitives
//! of one frame in flight and names the command buffer it records into.
//!
//! # Overview
//!
//! With N slots the CPU can prepare frame `k + 1` while the GPU still
//! renders frame `k`, up to N frames ahead:
//!
//! 1. Each slot has its own command buffer, semaphores and fence
//! 2. The fence of slot `f` gates reuse of everything slot `f` owns
//! 3. Slots are created once at startup and survive swapchain rebuilds
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frameloop_renderer::frame_ring::FrameRing;
//! use frameloop_rhi::command::CommandPool;
//! use frameloop_rhi::device::VulkanDevice;
//!
//! # fn example(device: Arc<VulkanDevice>, pool: &CommandPool<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let ring = FrameRing::new(device, pool, 2)?;
//! let mut frame = 0;
//! loop {
//!     let slot = ring.acquire_slot(frame);
//!     slot.in_flight_fence().wait(Duration::from_secs(5))?;
//!     // acquire, record, submit, present...
//!     frame = ring.next_index(frame);
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use frameloop_rhi::RhiResult;
use frameloop_rhi::backend::Backend;
use frameloop_rhi::command::CommandPool;
use frameloop_rhi::sync::{Fence, Semaphore};

/// Per-frame synchronization data.
///
/// # Synchronization Flow
///
/// ```text
/// 1. Wait on in_flight_fence (CPU waits for the previous use of this slot)
/// 2. Acquire swapchain image (signals image_available)
/// 3. Reset in_flight_fence, record command_buffer
/// 4. Submit command_buffer:
///    - Wait on image_available at COLOR_ATTACHMENT_OUTPUT
///    - Signal render_finished
///    - Signal in_flight_fence
/// 5. Present (waits on render_finished)
/// ```
pub struct FrameSlot<B: Backend> {
    /// Primary command buffer, freed with the pool it came from.
    command_buffer: vk::CommandBuffer,
    /// Semaphore signaled when the acquired image is available.
    image_available: Semaphore<B>,
    /// Semaphore signaled when rendering is complete.
    render_finished: Semaphore<B>,
    /// Fence signaled when the GPU is done with this slot.
    in_flight_fence: Fence<B>,
}

impl<B: Backend> FrameSlot<B> {
    fn new(backend: Arc<B>, command_buffer: vk::CommandBuffer) -> RhiResult<Self> {
        let image_available = Semaphore::new(Arc::clone(&backend))?;
        let render_finished = Semaphore::new(Arc::clone(&backend))?;
        // Signaled so the first wait on a fresh slot returns immediately.
        let in_flight_fence = Fence::new(backend, true)?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore<B> {
        &self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore<B> {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence<B> {
        &self.in_flight_fence
    }
}

/// Fixed ring of [`FrameSlot`]s.
///
/// # Thread Safety
///
/// Slots must only be used from the thread that drives the frame loop.
pub struct FrameRing<B: Backend> {
    slots: Vec<FrameSlot<B>>,
}

impl<B: Backend> FrameRing<B> {
    /// Creates `count` slots, allocating their command buffers from
    /// `command_pool`.
    ///
    /// A `count` of zero is raised to one.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`](frameloop_rhi::RhiError::Setup) if a
    /// command buffer, semaphore or fence cannot be created.
    pub fn new(backend: Arc<B>, command_pool: &CommandPool<B>, count: usize) -> RhiResult<Self> {
        if count == 0 {
            warn!("Frame ring needs at least one slot, using 1");
        }
        let count = count.max(1);

        let command_buffers = command_pool.allocate(count as u32)?;
        let slots = command_buffers
            .into_iter()
            .enumerate()
            .map(|(index, command_buffer)| {
                debug!("Creating frame slot {}", index);
                FrameSlot::new(Arc::clone(&backend), command_buffer)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Frame ring created with {} frames in flight", slots.len());

        Ok(Self { slots })
    }

    /// Returns slot `index`. Pure lookup, never blocks.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline]
    pub fn acquire_slot(&self, index: usize) -> &FrameSlot<B> {
        &self.slots[index]
    }

    /// Index of the slot that follows `index`.
    #[inline]
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    /// Number of slots (N).
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot<B>> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::mock::{MockBackend, ObjectKind};

    fn ring(backend: &Arc<MockBackend>, count: usize) -> (CommandPool<MockBackend>, FrameRing<MockBackend>) {
        let pool = CommandPool::new(Arc::clone(backend), 0).unwrap();
        let ring = FrameRing::new(Arc::clone(backend), &pool, count).unwrap();
        (pool, ring)
    }

    #[test]
    fn test_ring_creates_primitives_per_slot() {
        let backend = Arc::new(MockBackend::new());
        let (_pool, ring) = ring(&backend, 3);

        assert_eq!(ring.len(), 3);
        assert_eq!(backend.live(ObjectKind::Semaphore), 6);
        assert_eq!(backend.live(ObjectKind::Fence), 3);
        assert_eq!(backend.live(ObjectKind::CommandBuffer), 3);
    }

    #[test]
    fn test_fences_start_signaled() {
        let backend = Arc::new(MockBackend::new());
        let (_pool, ring) = ring(&backend, 2);

        assert!(ring.iter().all(|slot| slot.in_flight_fence().is_signaled()));
    }

    #[test]
    fn test_next_index_wraps() {
        let backend = Arc::new(MockBackend::new());
        let (_pool, ring) = ring(&backend, 2);

        let mut index = 0;
        let visited: Vec<usize> = (0..5)
            .map(|_| {
                let current = index;
                index = ring.next_index(index);
                current
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_slots_are_distinct() {
        let backend = Arc::new(MockBackend::new());
        let (_pool, ring) = ring(&backend, 2);

        let a = ring.acquire_slot(0);
        let b = ring.acquire_slot(1);
        assert_ne!(a.command_buffer(), b.command_buffer());
        assert_ne!(a.image_available().handle(), b.image_available().handle());
        assert_ne!(a.in_flight_fence().handle(), b.in_flight_fence().handle());
    }

    #[test]
    fn test_zero_slots_raised_to_one() {
        let backend = Arc::new(MockBackend::new());
        let (_pool, ring) = ring(&backend, 0);

        assert_eq!(ring.len(), 1);
        assert_eq!(ring.next_index(0), 0);
    }

    #[test]
    fn test_drop_releases_sync_objects() {
        let backend = Arc::new(MockBackend::new());
        let (pool, ring) = ring(&backend, 2);
        drop(ring);
        assert_eq!(backend.live(ObjectKind::Fence), 0);
        assert_eq!(backend.live(ObjectKind::Semaphore), 0);

        drop(pool);
        assert_eq!(backend.live_objects(), 0);
        assert!(backend.violations().is_empty());
    }
}

//! Command pool and command buffer recording.
//!
//! # Overview
//!
//! - [`CommandPool`] owns a `vk::CommandPool` and allocates primary buffers
//! - [`CommandBuffer`] is a borrowed view over a raw command buffer handle
//!   with one method per command the renderer records
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::backend::Backend;
//! use frameloop_rhi::command::{CommandBuffer, CommandPool};
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::vk;
//!
//! # fn example(device: Arc<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let family = device.queue_families().graphics;
//! let pool = CommandPool::new(device.clone(), family)?;
//! let handles = pool.allocate(1)?;
//!
//! let cmd = CommandBuffer::new(device.as_ref(), handles[0]);
//! cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
//! // ... record commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::backend::{Backend, RenderPassBegin};
use crate::error::{RhiError, RhiResult};

/// Command pool wrapper.
///
/// Command buffers allocated from the pool are released together with it.
pub struct CommandPool<B: Backend> {
    /// Backend that created the pool.
    backend: Arc<B>,
    /// Vulkan command pool handle.
    pool: vk::CommandPool,
    /// Queue family index this pool belongs to.
    queue_family_index: u32,
}

impl<B: Backend> CommandPool<B> {
    /// Creates a command pool whose buffers can be reset individually.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if pool creation fails.
    pub fn new(backend: Arc<B>, queue_family_index: u32) -> RhiResult<Self> {
        let pool = backend
            .create_command_pool(
                queue_family_index,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .map_err(|e| RhiError::setup("vkCreateCommandPool", e))?;

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            backend,
            pool,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family index this pool submits to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.backend
            .allocate_command_buffers(self.pool, count)
            .map_err(|e| RhiError::setup("vkAllocateCommandBuffers", e))
    }

    /// Returns command buffers to the pool.
    ///
    /// The buffers must not be pending execution.
    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        self.backend.free_command_buffers(self.pool, buffers);
    }
}

impl<B: Backend> Drop for CommandPool<B> {
    fn drop(&mut self) {
        self.backend.destroy_command_pool(self.pool);
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Recording interface over a raw command buffer.
///
/// Does not own the handle; it is freed with its [`CommandPool`].
#[derive(Clone, Copy)]
pub struct CommandBuffer<'a, B: Backend> {
    backend: &'a B,
    buffer: vk::CommandBuffer,
}

impl<'a, B: Backend> CommandBuffer<'a, B> {
    #[inline]
    pub fn new(backend: &'a B, buffer: vk::CommandBuffer) -> Self {
        Self { backend, buffer }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording.
    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) -> RhiResult<()> {
        self.backend
            .begin_command_buffer(self.buffer, flags)
            .map_err(|e| RhiError::runtime("vkBeginCommandBuffer", e))
    }

    /// Ends recording.
    pub fn end(&self) -> RhiResult<()> {
        self.backend
            .end_command_buffer(self.buffer)
            .map_err(|e| RhiError::runtime("vkEndCommandBuffer", e))
    }

    /// Resets the buffer to the initial state.
    ///
    /// The buffer must not be pending execution.
    pub fn reset(&self) -> RhiResult<()> {
        self.backend
            .reset_command_buffer(self.buffer)
            .map_err(|e| RhiError::runtime("vkResetCommandBuffer", e))
    }

    // =========================================================================
    // Render Pass and State
    // =========================================================================

    pub fn begin_render_pass(&self, begin: &RenderPassBegin) {
        self.backend.cmd_begin_render_pass(self.buffer, begin);
    }

    pub fn end_render_pass(&self) {
        self.backend.cmd_end_render_pass(self.buffer);
    }

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.backend.cmd_bind_pipeline(self.buffer, pipeline);
    }

    /// Sets a viewport covering `extent` with depth range 0..1.
    pub fn set_viewport(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.backend.cmd_set_viewport(self.buffer, viewport);
    }

    /// Sets a scissor covering `extent`.
    pub fn set_scissor(&self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self.backend.cmd_set_scissor(self.buffer, scissor);
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        self.backend.cmd_bind_vertex_buffer(self.buffer, buffer, 0);
    }

    /// Binds a 32-bit index buffer.
    pub fn bind_index_buffer(&self, buffer: vk::Buffer) {
        self.backend
            .cmd_bind_index_buffer(self.buffer, buffer, 0, vk::IndexType::UINT32);
    }

    /// Binds one descriptor set at set index 0.
    pub fn bind_descriptor_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        self.backend.cmd_bind_descriptor_set(self.buffer, layout, set);
    }

    pub fn draw_indexed(&self, index_count: u32) {
        self.backend.cmd_draw_indexed(self.buffer, index_count, 1);
    }

    // =========================================================================
    // Transfer and Barriers
    // =========================================================================

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.backend
            .cmd_pipeline_barrier(self.buffer, src_stage, dst_stage, image_barriers);
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.backend.cmd_copy_buffer(self.buffer, src, dst, regions);
    }

    /// Copies buffer contents into an image in `TRANSFER_DST_OPTIMAL` layout.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        self.backend.cmd_copy_buffer_to_image(
            self.buffer,
            src,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockCall, ObjectKind};

    #[test]
    fn test_command_pool_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool<MockBackend>>();
    }

    #[test]
    fn test_pool_allocates_and_releases() {
        let backend = Arc::new(MockBackend::new());
        {
            let pool = CommandPool::new(Arc::clone(&backend), 0).unwrap();
            let buffers = pool.allocate(3).unwrap();
            assert_eq!(buffers.len(), 3);
            assert_eq!(backend.live(ObjectKind::CommandBuffer), 3);
            pool.free(&buffers[..1]);
            assert_eq!(backend.live(ObjectKind::CommandBuffer), 2);
        }
        assert_eq!(backend.live(ObjectKind::CommandPool), 0);
        assert_eq!(backend.live(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_recording_reaches_backend() {
        let backend = Arc::new(MockBackend::new());
        let pool = CommandPool::new(Arc::clone(&backend), 0).unwrap();
        let handle = pool.allocate(1).unwrap()[0];

        let extent = vk::Extent2D {
            width: 320,
            height: 200,
        };
        let cmd = CommandBuffer::new(backend.as_ref(), handle);
        cmd.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cmd.set_viewport(extent);
        cmd.set_scissor(extent);
        cmd.draw_indexed(12);
        cmd.end().unwrap();

        let calls = backend.calls();
        assert!(calls.iter().any(|c| matches!(
            c,
            MockCall::SetViewport { width, height } if *width == 320.0 && *height == 200.0
        )));
        assert!(calls.iter().any(|c| matches!(
            c,
            MockCall::SetScissor { extent: e } if *e == extent
        )));
        assert!(
            calls
                .iter()
                .any(|c| matches!(c, MockCall::DrawIndexed { index_count: 12 }))
        );
    }
}

//! Device resource pool.
//!
//! [`ResourcePool`] creates memory-backed buffers and images, uploads data
//! into device-local memory through staging buffers, and runs blocking
//! one-shot command buffers for copies and image layout transitions.
//!
//! # Overview
//!
//! - [`ResourcePool::create_buffer`] / [`ResourcePool::create_image`] return
//!   RAII objects that release their handle and memory on drop
//! - [`ResourcePool::run_one_time_commands`] records, submits and waits for
//!   a single command buffer on the graphics queue
//! - [`transition_masks`] is the table of supported image layout transitions
//!
//! One-shot submissions block until the graphics queue is idle. They are
//! only used while building resources, never inside the frame loop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_renderer::resource_pool::ResourcePool;
//! use frameloop_rhi::buffer::BufferUsage;
//! use frameloop_rhi::device::VulkanDevice;
//!
//! # fn example(device: Arc<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let pool = ResourcePool::new(device)?;
//! let indices: [u32; 3] = [0, 1, 2];
//! let index_buffer = pool.upload_buffer(BufferUsage::Index, bytemuck::cast_slice(&indices))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use frameloop_rhi::backend::{Backend, SubmitDesc};
use frameloop_rhi::buffer::{Buffer, BufferUsage};
use frameloop_rhi::command::{CommandBuffer, CommandPool};
use frameloop_rhi::image::{Image, ImageDesc, full_subresource_range};
use frameloop_rhi::{RhiError, RhiResult};

/// Stage and access masks applied by one image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Stage that must finish before the barrier.
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits for the barrier.
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Looks up the barrier masks for an `old` to `new` layout transition.
///
/// Only the transitions texture upload needs are supported:
///
/// | old → new | src stage | dst stage | src access | dst access |
/// |---|---|---|---|---|
/// | `UNDEFINED` → `TRANSFER_DST_OPTIMAL` | top of pipe | transfer | none | transfer write |
/// | `TRANSFER_DST_OPTIMAL` → `SHADER_READ_ONLY_OPTIMAL` | transfer | fragment shader | transfer write | shader read |
///
/// # Errors
///
/// Any other pair fails with [`RhiError::UnsupportedTransition`].
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> RhiResult<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
            })
        }
        _ => Err(RhiError::UnsupportedTransition { old, new }),
    }
}

/// Owner of the transfer command pool and factory for memory-backed objects.
pub struct ResourcePool<B: Backend> {
    backend: Arc<B>,
    /// Pool on the graphics family, shared with the frame command buffers.
    command_pool: CommandPool<B>,
}

impl<B: Backend> ResourcePool<B> {
    /// Creates the pool and its command pool on the graphics queue family.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if the command pool cannot be created.
    pub fn new(backend: Arc<B>) -> RhiResult<Self> {
        let family = backend.queue_families().graphics;
        let command_pool = CommandPool::new(Arc::clone(&backend), family)?;
        Ok(Self {
            backend,
            command_pool,
        })
    }

    #[inline]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Command pool command buffers for the frame ring are allocated from.
    #[inline]
    pub fn command_pool(&self) -> &CommandPool<B> {
        &self.command_pool
    }

    /// Creates a buffer with fresh memory matching `properties`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ResourceCreation`] or [`RhiError::OutOfMemoryType`].
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Buffer<B>> {
        Buffer::new(Arc::clone(&self.backend), size, usage, properties)
    }

    /// Creates a 2D image (one mip, one layer, one sample) with fresh memory.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ResourceCreation`] or [`RhiError::OutOfMemoryType`].
    pub fn create_image(&self, desc: ImageDesc) -> RhiResult<Image<B>> {
        Image::new(Arc::clone(&self.backend), desc)
    }

    /// Creates a host-visible staging buffer holding `data`.
    pub fn create_staging_buffer(&self, data: &[u8]) -> RhiResult<Buffer<B>> {
        let mut staging = Buffer::with_usage(
            Arc::clone(&self.backend),
            BufferUsage::Staging,
            data.len() as vk::DeviceSize,
        )?;
        staging.map_persistent()?;
        staging.write_bytes(0, data)?;
        Ok(staging)
    }

    /// Copies `data` into a new device-local buffer through a staging buffer.
    ///
    /// The staging buffer is released before returning.
    pub fn upload_buffer(&self, usage: BufferUsage, data: &[u8]) -> RhiResult<Buffer<B>> {
        let size = data.len() as vk::DeviceSize;
        let staging = self.create_staging_buffer(data)?;
        let buffer = Buffer::with_usage(Arc::clone(&self.backend), usage, size)?;

        self.run_one_time_commands(|cmd| {
            cmd.copy_buffer(
                staging.handle(),
                buffer.handle(),
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );
            Ok(())
        })?;

        debug!("Uploaded {} bytes as {:?} buffer", size, usage);
        Ok(buffer)
    }

    /// Records commands with `body`, submits them to the graphics queue and
    /// blocks until the queue is idle.
    ///
    /// The command buffer is freed whether or not `body` succeeds.
    pub fn run_one_time_commands<F>(&self, body: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer<'_, B>) -> RhiResult<()>,
    {
        let buffers = self.command_pool.allocate(1)?;
        let result = match buffers.first() {
            Some(&handle) => self.submit_and_wait(handle, body),
            None => Err(RhiError::setup(
                "vkAllocateCommandBuffers",
                vk::Result::ERROR_UNKNOWN,
            )),
        };
        self.command_pool.free(&buffers);
        result
    }

    fn submit_and_wait<F>(&self, handle: vk::CommandBuffer, body: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer<'_, B>) -> RhiResult<()>,
    {
        let cmd = CommandBuffer::new(self.backend.as_ref(), handle);
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        body(&cmd)?;
        cmd.end()?;

        let queue = self.backend.graphics_queue();
        let command_buffers = [handle];
        let submit = SubmitDesc {
            command_buffers: &command_buffers,
            ..Default::default()
        };
        self.backend
            .queue_submit(queue, &submit, vk::Fence::null())
            .map_err(|e| RhiError::runtime("vkQueueSubmit", e))?;
        self.backend
            .queue_wait_idle(queue)
            .map_err(|e| RhiError::runtime("vkQueueWaitIdle", e))
    }

    /// Moves the color aspect of `image` from `old` to `new` with a one-shot
    /// pipeline barrier.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedTransition`] before recording anything
    /// if the pair is not in the [`transition_masks`] table.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<()> {
        let masks = transition_masks(old, new)?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(full_subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        self.run_one_time_commands(|cmd| {
            cmd.pipeline_barrier(masks.src_stage, masks.dst_stage, &[barrier]);
            Ok(())
        })?;

        debug!("Transitioned image {:?} -> {:?}", old, new);
        Ok(())
    }

    /// Copies a tightly packed staging buffer into the whole of `image`,
    /// which must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        self.run_one_time_commands(|cmd| {
            cmd.copy_buffer_to_image(buffer, image, &[region]);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::mock::{MockBackend, MockCall, ObjectKind};

    const UNSUPPORTED: [(vk::ImageLayout, vk::ImageLayout); 5] = [
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::UNDEFINED),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED),
    ];

    #[test]
    fn test_transition_masks_table() {
        let upload = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(upload.src_access, vk::AccessFlags::empty());
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let sample = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(sample.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(sample.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_transition_masks_rejects_other_pairs() {
        for (old, new) in UNSUPPORTED {
            let err = transition_masks(old, new).unwrap_err();
            assert!(
                matches!(err, RhiError::UnsupportedTransition { old: o, new: n } if o == old && n == new),
                "{old:?} -> {new:?} should be unsupported"
            );
        }
    }

    #[test]
    fn test_unsupported_transition_records_nothing() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();
        backend.clear_calls();

        let result = pool.transition_image_layout(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        assert!(matches!(result, Err(RhiError::UnsupportedTransition { .. })));
        assert!(backend.calls().is_empty());
        assert_eq!(backend.created(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_one_time_commands_block_until_idle() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();
        backend.clear_calls();

        pool.run_one_time_commands(|cmd| {
            cmd.copy_buffer(vk::Buffer::null(), vk::Buffer::null(), &[]);
            Ok(())
        })
        .unwrap();

        let calls = backend.calls();
        let submit = calls
            .iter()
            .position(|c| matches!(c, MockCall::QueueSubmit { fence, .. } if *fence == vk::Fence::null()))
            .expect("one-shot submit");
        let idle = calls
            .iter()
            .position(|c| matches!(c, MockCall::QueueWaitIdle { .. }))
            .expect("queue idle wait");
        assert!(submit < idle);
        assert_eq!(backend.pending_submissions(), 0);
        assert_eq!(backend.live(ObjectKind::CommandBuffer), 0);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_one_time_commands_free_buffer_on_body_error() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();

        let result = pool.run_one_time_commands(|_| {
            Err(RhiError::UnsupportedTransition {
                old: vk::ImageLayout::UNDEFINED,
                new: vk::ImageLayout::GENERAL,
            })
        });

        assert!(result.is_err());
        assert_eq!(backend.live(ObjectKind::CommandBuffer), 0);
        assert_eq!(backend.pending_submissions(), 0);
    }

    #[test]
    fn test_transition_records_documented_masks() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();
        backend.clear_calls();

        pool.transition_image_layout(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        pool.transition_image_layout(
            vk::Image::null(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();

        let barriers: Vec<MockCall> = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::PipelineBarrier { .. }))
            .collect();
        assert_eq!(
            barriers,
            vec![
                MockCall::PipelineBarrier {
                    src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                    dst_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::TRANSFER_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                },
                MockCall::PipelineBarrier {
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            ]
        );
    }

    #[test]
    fn test_upload_buffer_releases_staging() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();
        let data = [7u8; 64];

        let buffer = pool.upload_buffer(BufferUsage::Vertex, &data).unwrap();

        assert_eq!(buffer.size(), 64);
        assert_eq!(backend.created(ObjectKind::Buffer), 2);
        assert_eq!(backend.live(ObjectKind::Buffer), 1);
        assert_eq!(backend.live(ObjectKind::Memory), 1);
        assert!(backend.calls().contains(&MockCall::CopyBuffer { size: 64 }));

        drop(buffer);
        drop(pool);
        assert_eq!(backend.live_objects(), 0);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_create_buffer_without_memory_type() {
        let backend = Arc::new(MockBackend::new());
        backend.set_memory_types(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();

        let result = pool.create_buffer(
            16,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );

        assert!(matches!(result, Err(RhiError::OutOfMemoryType { .. })));
        assert_eq!(backend.live(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_create_image_failure_names_call() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();
        backend.fail_next("vkCreateImage", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let result = pool.create_image(ImageDesc::device_local(
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED,
        ));

        assert!(matches!(
            result,
            Err(RhiError::ResourceCreation {
                operation: "vkCreateImage",
                ..
            })
        ));
    }
}

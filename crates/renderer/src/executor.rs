//! Frame executor: the acquire → record → submit → present state machine.
//!
//! [`FrameExecutor`] owns every long-lived GPU object of the renderer and
//! drives one frame per [`draw_frame`](FrameExecutor::draw_frame) call.
//!
//! # Frame Iteration
//!
//! Given the current slot `f` in `0..N`:
//!
//! ```text
//! Idle        wait on slot f's fence (bounded)
//! Acquiring   acquire an image, signaling slot f's image_available
//!             out of date -> Invalidated: rebuild, return, f unchanged
//! Recording   write slot f's uniform buffer, re-record slot f's commands
//! Submitted   reset slot f's fence, submit (wait image_available at
//!             COLOR_ATTACHMENT_OUTPUT, signal render_finished + fence)
//! Presenting  present, waiting on render_finished
//!             suboptimal / out of date / resized -> rebuild after present
//! Idle        f = (f + 1) mod N
//! ```
//!
//! The fence is reset only after an image was acquired, so a failed
//! acquire never leaves it unsignaled.
//!
//! # Resource Destruction Order
//!
//! After the device is idle, resources are released in this order:
//! 1. Sync primitives
//! 2. Descriptor pool
//! 3. Per-frame uniform buffers
//! 4. Static index and vertex buffers
//! 5. Texture (sampler, view, image)
//! 6. Command pool
//! 7. Pipeline and pipeline layout
//! 8. Descriptor set layout
//! 9. Render pass
//! 10. Swapchain object graph
//!
//! The device, debug messenger, surface and instance follow when the last
//! `Arc` of the backend is dropped.
//!
//! # Example
//!
//! ```no_run
//! use frameloop_core::RendererConfig;
//! use frameloop_renderer::{FrameExecutor, ShaderBinaries};
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::surface::SurfaceProvider;
//!
//! # fn example(provider: &mut impl SurfaceProvider) -> Result<(), frameloop_rhi::RhiError> {
//! let config = RendererConfig::default();
//! let device = VulkanDevice::new(config.validation_enabled(), &*provider)?;
//! let shaders = ShaderBinaries::load(&config)?;
//! let mut executor = FrameExecutor::new(device, provider, config, &shaders)?;
//! executor.run(provider)?;
//! executor.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, error, info, trace};

use frameloop_core::{RendererConfig, Timer};
use frameloop_rhi::backend::{Backend, DescriptorWrite, RenderPassBegin, SubmitDesc};
use frameloop_rhi::buffer::{Buffer, BufferUsage};
use frameloop_rhi::command::CommandBuffer;
use frameloop_rhi::descriptor::DescriptorPool;
use frameloop_rhi::pipeline::RenderPass;
use frameloop_rhi::surface::SurfaceProvider;
use frameloop_rhi::swapchain::{AcquireOutcome, REQUIRED_SURFACE_FORMAT};
use frameloop_rhi::{RhiError, RhiResult};

use crate::depth_target::find_depth_format;
use crate::draw_pipeline::{DrawPipeline, SAMPLER_BINDING, ShaderBinaries, UNIFORM_BINDING};
use crate::frame_ring::FrameRing;
use crate::mesh::Mesh;
use crate::resource_pool::ResourcePool;
use crate::swapchain_manager::SwapchainManager;
use crate::texture::Texture;
use crate::ubo::TransformUbo;

/// Interval between frame-rate reports in [`FrameExecutor::run`].
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Depth value the depth attachment is cleared to (far plane).
const CLEAR_DEPTH: f32 = 1.0;

/// Where the executor is within a frame iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    /// The swapchain is being rebuilt.
    Invalidated,
}

impl FrameState {
    pub fn name(self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::Acquiring => "acquiring",
            FrameState::Recording => "recording",
            FrameState::Submitted => "submitted",
            FrameState::Presenting => "presenting",
            FrameState::Invalidated => "invalidated",
        }
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one [`FrameExecutor::draw_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A full iteration ran and the frame index advanced.
    Presented {
        /// Frame slot used by this iteration.
        slot: usize,
        /// Swapchain image rendered and presented.
        image_index: u32,
        /// The swapchain was rebuilt after presenting.
        rebuilt: bool,
    },
    /// Acquire reported an out-of-date swapchain. It was rebuilt and the
    /// frame index was left unchanged, so the next call retries the frame.
    Invalidated,
}

/// The frame loop state machine and owner of all renderer resources.
///
/// Field order is the release order; see the module docs.
pub struct FrameExecutor<B: Backend> {
    ring: FrameRing<B>,
    /// Only held so it is released in order.
    _descriptor_pool: DescriptorPool<B>,
    uniform_buffers: Vec<Buffer<B>>,
    mesh: Mesh<B>,
    _texture: Texture<B>,
    _resources: ResourcePool<B>,
    pipeline: DrawPipeline<B>,
    render_pass: RenderPass<B>,
    swapchain: SwapchainManager<B>,

    /// One per slot, freed with the descriptor pool.
    descriptor_sets: Vec<vk::DescriptorSet>,
    backend: Arc<B>,
    config: RendererConfig,
    timer: Timer,
    current_frame: usize,
    state: FrameState,
    frames_presented: u64,
    /// Set once `shutdown` has confirmed the device is idle.
    device_idle: bool,
}

impl<B: Backend> FrameExecutor<B> {
    /// Builds every renderer resource.
    ///
    /// # Arguments
    ///
    /// * `backend` - Device to render with
    /// * `provider` - Surface provider, queried for the initial size
    /// * `config` - Immutable renderer configuration; `frames_in_flight`
    ///   sets N
    /// * `shaders` - SPIR-V binaries of the fixed pipeline
    ///
    /// # Errors
    ///
    /// Returns the first setup or resource creation failure. Objects created
    /// before the failure are released.
    pub fn new<P>(
        backend: Arc<B>,
        provider: &mut P,
        config: RendererConfig,
        shaders: &ShaderBinaries,
    ) -> RhiResult<Self>
    where
        P: SurfaceProvider + ?Sized,
    {
        let depth_format = find_depth_format(backend.as_ref())?;
        let render_pass = RenderPass::color_depth(
            Arc::clone(&backend),
            REQUIRED_SURFACE_FORMAT.format,
            depth_format,
        )?;
        let swapchain = SwapchainManager::new(
            Arc::clone(&backend),
            provider,
            render_pass.handle(),
            depth_format,
        )?;
        let pipeline = DrawPipeline::new(Arc::clone(&backend), &render_pass, shaders)?;

        let resources = ResourcePool::new(Arc::clone(&backend))?;
        let texture = Texture::checkerboard(&resources)?;
        let mesh = Mesh::stacked_quads(&resources)?;

        let ring = FrameRing::new(
            Arc::clone(&backend),
            resources.command_pool(),
            config.frames_in_flight,
        )?;
        let frames = ring.len();

        let uniform_buffers = (0..frames)
            .map(|_| {
                let mut buffer = Buffer::with_usage(
                    Arc::clone(&backend),
                    BufferUsage::Uniform,
                    TransformUbo::SIZE as vk::DeviceSize,
                )?;
                buffer.map_persistent()?;
                Ok::<_, RhiError>(buffer)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let descriptor_pool = DescriptorPool::new(
            Arc::clone(&backend),
            frames as u32,
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: frames as u32,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: frames as u32,
                },
            ],
        )?;
        let descriptor_sets =
            descriptor_pool.allocate(&vec![pipeline.descriptor_set_layout(); frames])?;

        // Written once; the buffer binding stays valid across frames.
        let writes: Vec<DescriptorWrite> = descriptor_sets
            .iter()
            .zip(&uniform_buffers)
            .flat_map(|(&set, buffer)| {
                [
                    DescriptorWrite::UniformBuffer {
                        set,
                        binding: UNIFORM_BINDING,
                        buffer: buffer.handle(),
                        range: TransformUbo::SIZE as vk::DeviceSize,
                    },
                    DescriptorWrite::CombinedImageSampler {
                        set,
                        binding: SAMPLER_BINDING,
                        view: texture.view(),
                        sampler: texture.sampler(),
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                ]
            })
            .collect();
        backend.update_descriptor_sets(&writes);

        info!(
            "Frame executor ready: {} frames in flight, {} swapchain images",
            frames,
            swapchain.image_count()
        );

        Ok(Self {
            ring,
            _descriptor_pool: descriptor_pool,
            uniform_buffers,
            mesh,
            _texture: texture,
            _resources: resources,
            pipeline,
            render_pass,
            swapchain,
            descriptor_sets,
            backend,
            config,
            timer: Timer::new(),
            current_frame: 0,
            state: FrameState::Idle,
            frames_presented: 0,
            device_idle: false,
        })
    }

    fn enter(&mut self, state: FrameState) {
        trace!(
            "Frame {}: {} -> {}",
            self.current_frame, self.state, state
        );
        self.state = state;
    }

    /// Runs one frame iteration.
    ///
    /// # Errors
    ///
    /// Swapchain invalidation is handled internally. Any other failure is
    /// fatal, including [`RhiError::Timeout`] from a bounded wait and
    /// [`RhiError::DeviceLost`].
    pub fn draw_frame<P>(&mut self, provider: &mut P) -> RhiResult<FrameOutcome>
    where
        P: SurfaceProvider + ?Sized,
    {
        let frame = self.current_frame;

        // Step 1: the device is done with everything slot `frame` owns.
        self.ring
            .acquire_slot(frame)
            .in_flight_fence()
            .wait(self.config.fence_timeout())?;

        // Step 2
        self.enter(FrameState::Acquiring);
        let image_available = self.ring.acquire_slot(frame).image_available().handle();
        let acquired = self
            .swapchain
            .acquire_next_image(self.config.acquire_timeout(), image_available)?;
        let (image_index, suboptimal) = match acquired {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                self.enter(FrameState::Invalidated);
                debug!("Swapchain out of date on acquire, rebuilding");
                self.swapchain.rebuild(provider)?;
                self.enter(FrameState::Idle);
                return Ok(FrameOutcome::Invalidated);
            }
        };
        if suboptimal {
            debug!("Acquired suboptimal image {}, rebuilding after present", image_index);
        }

        // Step 3
        self.enter(FrameState::Recording);
        let transform = TransformUbo::at(self.timer.elapsed(), self.swapchain.extent());
        self.uniform_buffers[frame].write(0, &[transform])?;

        // Step 4
        self.record(frame, image_index)?;

        // Step 5
        self.submit(frame)?;
        self.enter(FrameState::Submitted);

        // Step 6
        self.enter(FrameState::Presenting);
        let render_finished = self.ring.acquire_slot(frame).render_finished().handle();
        let presented =
            self.swapchain
                .present(self.backend.present_queue(), image_index, render_finished)?;
        let resized = provider.take_resized();

        let rebuild = suboptimal || presented.needs_rebuild() || resized;
        if rebuild {
            self.enter(FrameState::Invalidated);
            debug!(
                "Rebuilding after present ({:?}, suboptimal acquire: {}, resized: {})",
                presented, suboptimal, resized
            );
            self.swapchain.rebuild(provider)?;
        }

        // Step 7
        self.current_frame = self.ring.next_index(frame);
        self.frames_presented += 1;
        self.enter(FrameState::Idle);

        Ok(FrameOutcome::Presented {
            slot: frame,
            image_index,
            rebuilt: rebuild,
        })
    }

    /// Re-records slot `frame`'s command buffer for `image_index`.
    fn record(&self, frame: usize, image_index: u32) -> RhiResult<()> {
        let framebuffer = self.swapchain.framebuffer(image_index)?;
        let extent = self.swapchain.extent();
        let cmd = CommandBuffer::new(self.backend.as_ref(), self.ring.acquire_slot(frame).command_buffer());

        cmd.reset()?;
        cmd.begin(vk::CommandBufferUsageFlags::empty())?;
        cmd.begin_render_pass(&RenderPassBegin {
            render_pass: self.render_pass.handle(),
            framebuffer,
            extent,
            clear_color: self.config.clear_color,
            clear_depth: CLEAR_DEPTH,
        });
        cmd.bind_pipeline(self.pipeline.pipeline());
        cmd.set_viewport(extent);
        cmd.set_scissor(extent);
        cmd.bind_vertex_buffer(self.mesh.vertex_buffer().handle());
        cmd.bind_index_buffer(self.mesh.index_buffer().handle());
        cmd.bind_descriptor_set(self.pipeline.layout(), self.descriptor_sets[frame]);
        cmd.draw_indexed(self.mesh.index_count());
        cmd.end_render_pass();
        cmd.end()
    }

    /// Resets slot `frame`'s fence and submits its command buffer.
    fn submit(&self, frame: usize) -> RhiResult<()> {
        let slot = self.ring.acquire_slot(frame);
        slot.in_flight_fence().reset()?;

        let wait = [(
            slot.image_available().handle(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )];
        let command_buffers = [slot.command_buffer()];
        let signal = [slot.render_finished().handle()];
        let submit = SubmitDesc {
            wait: &wait,
            command_buffers: &command_buffers,
            signal: &signal,
        };

        self.backend
            .queue_submit(
                self.backend.graphics_queue(),
                &submit,
                slot.in_flight_fence().handle(),
            )
            .map_err(|e| RhiError::runtime("vkQueueSubmit", e))
    }

    /// Pumps events and draws frames until the provider asks to close.
    ///
    /// Logs the frame rate every [`STATS_INTERVAL`].
    pub fn run<P>(&mut self, provider: &mut P) -> RhiResult<()>
    where
        P: SurfaceProvider + ?Sized,
    {
        info!("Entering frame loop");
        let mut stats = Timer::new();
        let mut frames_since_report = 0u64;

        loop {
            provider.poll_events();
            if provider.should_close() {
                break;
            }

            if let FrameOutcome::Presented { .. } = self.draw_frame(provider)? {
                frames_since_report += 1;
            }

            if stats.since_tick() >= STATS_INTERVAL {
                let interval = stats.tick().as_secs_f64();
                info!(
                    "{:.1} fps ({} frames in {:.1}s, {} swapchain rebuilds)",
                    frames_since_report as f64 / interval,
                    frames_since_report,
                    interval,
                    self.swapchain.rebuild_count()
                );
                frames_since_report = 0;
            }
        }

        info!(
            "Frame loop finished after {} frames",
            self.frames_presented
        );
        Ok(())
    }

    /// Runs the frame loop, then shuts down.
    ///
    /// # Errors
    ///
    /// A frame loop failure takes precedence; a shutdown failure that
    /// follows it is logged and dropped.
    pub fn run_to_completion<P>(mut self, provider: &mut P) -> RhiResult<()>
    where
        P: SurfaceProvider + ?Sized,
    {
        let result = self.run(provider);
        let shutdown = self.shutdown();
        match (result, shutdown) {
            (Err(e), Err(shutdown_err)) => {
                error!("Shutdown after failed frame loop also failed: {}", shutdown_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), shutdown) => shutdown,
        }
    }

    /// Waits for the device to go idle, then releases every resource in
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the idle wait failure. Resources are released either way.
    pub fn shutdown(mut self) -> RhiResult<()> {
        info!("Shutting down frame executor");
        self.backend
            .device_wait_idle()
            .map_err(|e| RhiError::runtime("vkDeviceWaitIdle", e))?;
        self.device_idle = true;
        Ok(())
    }

    pub fn mesh(&self) -> &Mesh<B> {
        &self.mesh
    }

    /// Index of the slot the next iteration uses.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of frame slots (N).
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Iterations that reached presentation.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn swapchain(&self) -> &SwapchainManager<B> {
        &self.swapchain
    }

    #[inline]
    pub fn ring(&self) -> &FrameRing<B> {
        &self.ring
    }

    #[inline]
    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    /// Uniform buffer handles, one per slot.
    pub fn uniform_buffers(&self) -> Vec<vk::Buffer> {
        self.uniform_buffers.iter().map(Buffer::handle).collect()
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl<B: Backend> Drop for FrameExecutor<B> {
    fn drop(&mut self) {
        if !self.device_idle {
            if let Err(e) = self.backend.device_wait_idle() {
                error!("Failed to wait for device idle before release: {}", e);
            }
        }
        debug!("Releasing renderer resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::mock::{MockBackend, MockSurfaceProvider};
    use frameloop_rhi::shader::SPIRV_MAGIC;

    fn shaders() -> ShaderBinaries {
        ShaderBinaries {
            vertex: vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0],
            fragment: vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0],
        }
    }

    fn executor(
        backend: &Arc<MockBackend>,
        provider: &mut MockSurfaceProvider,
    ) -> FrameExecutor<MockBackend> {
        FrameExecutor::new(
            Arc::clone(backend),
            provider,
            RendererConfig::default(),
            &shaders(),
        )
        .unwrap()
    }

    #[test]
    fn test_frame_state_names() {
        assert_eq!(FrameState::Idle.to_string(), "idle");
        assert_eq!(FrameState::Invalidated.to_string(), "invalidated");
    }

    #[test]
    fn test_new_sizes_everything_by_frames_in_flight() {
        let backend = Arc::new(MockBackend::new());
        let mut provider = MockSurfaceProvider::new(800, 600);
        let config = RendererConfig {
            frames_in_flight: 3,
            ..Default::default()
        };

        let executor =
            FrameExecutor::new(Arc::clone(&backend), &mut provider, config, &shaders()).unwrap();

        assert_eq!(executor.frames_in_flight(), 3);
        assert_eq!(executor.uniform_buffers().len(), 3);
        assert_eq!(executor.descriptor_sets().len(), 3);
        assert_eq!(executor.state(), FrameState::Idle);
    }

    #[test]
    fn test_draw_frame_advances_and_returns_to_idle() {
        let backend = Arc::new(MockBackend::new());
        let mut provider = MockSurfaceProvider::new(800, 600);
        let mut executor = executor(&backend, &mut provider);

        let outcome = executor.draw_frame(&mut provider).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                rebuilt: false
            }
        );
        assert_eq!(executor.current_frame(), 1);
        assert_eq!(executor.state(), FrameState::Idle);
        assert_eq!(executor.frames_presented(), 1);
    }

    #[test]
    fn test_failed_acquire_leaves_fence_signaled() {
        let backend = Arc::new(MockBackend::new());
        let mut provider = MockSurfaceProvider::new(800, 600);
        let mut executor = executor(&backend, &mut provider);
        backend.push_acquire_result(Err(vk::Result::ERROR_SURFACE_LOST_KHR));

        assert!(executor.draw_frame(&mut provider).is_err());
        assert!(executor.ring().acquire_slot(0).in_flight_fence().is_signaled());
        assert_eq!(executor.current_frame(), 0);
    }

    #[test]
    fn test_acquire_timeout_is_reported() {
        let backend = Arc::new(MockBackend::new());
        let mut provider = MockSurfaceProvider::new(800, 600);
        let mut executor = executor(&backend, &mut provider);
        backend.push_acquire_result(Err(vk::Result::TIMEOUT));

        let err = executor.draw_frame(&mut provider).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Timeout {
                operation: "vkAcquireNextImageKHR",
                ..
            }
        ));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let backend = Arc::new(MockBackend::new());
        let mut provider = MockSurfaceProvider::new(800, 600);
        let mut executor = executor(&backend, &mut provider);
        executor.draw_frame(&mut provider).unwrap();

        executor.shutdown().unwrap();

        assert_eq!(backend.live_objects(), 0);
        assert!(backend.violations().is_empty());
    }
}

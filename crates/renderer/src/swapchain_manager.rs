//! Swapchain manager.
//!
//! [`SwapchainManager`] owns everything whose lifetime is tied to the
//! swapchain: the swapchain itself, one view per presentable image, the
//! shared depth target and one framebuffer per image. The whole graph can be
//! torn down and rebuilt without touching the device.
//!
//! # Rebuild Sequence
//!
//! ```text
//! 1. Wait while the framebuffer size is zero (minimized window)
//! 2. Wait for the device to go idle
//! 3. Destroy: framebuffers -> depth target -> image views -> swapchain
//! 4. Select parameters from the current surface capabilities
//! 5. Create:  swapchain -> image views -> depth target -> framebuffers
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};

use frameloop_rhi::backend::Backend;
use frameloop_rhi::image::ImageView;
use frameloop_rhi::pipeline::Framebuffer;
use frameloop_rhi::surface::SurfaceProvider;
use frameloop_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use frameloop_rhi::{RhiError, RhiResult};

use crate::depth_target::DepthTarget;

/// Blocks on `provider` until it reports a drawable (non-zero) size.
///
/// Queries the size once per iteration and calls
/// [`SurfaceProvider::wait_events`] between queries. Returns `None` if the
/// provider asks to close while the size is still zero.
pub fn wait_for_drawable_size<P>(provider: &mut P) -> Option<(u32, u32)>
where
    P: SurfaceProvider + ?Sized,
{
    loop {
        let (width, height) = provider.framebuffer_size();
        if width != 0 && height != 0 {
            return Some((width, height));
        }
        if provider.should_close() {
            return None;
        }
        debug!("Framebuffer is {}x{}, waiting for events", width, height);
        provider.wait_events();
    }
}

/// One generation of swapchain-dependent objects.
///
/// Fields drop in declaration order, which is the required destruction
/// order.
struct SwapchainChain<B: Backend> {
    framebuffers: Vec<Framebuffer<B>>,
    depth: DepthTarget<B>,
    image_views: Vec<ImageView<B>>,
    swapchain: Swapchain<B>,
}

impl<B: Backend> SwapchainChain<B> {
    fn build(
        backend: &Arc<B>,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        framebuffer_size: (u32, u32),
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(Arc::clone(backend), framebuffer_size)?;
        let extent = swapchain.extent();

        let image_views = swapchain
            .images()
            .iter()
            .map(|&image| {
                ImageView::new(
                    Arc::clone(backend),
                    image,
                    swapchain.format(),
                    vk::ImageAspectFlags::COLOR,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let depth = DepthTarget::new(Arc::clone(backend), extent, depth_format)?;

        let framebuffers = image_views
            .iter()
            .map(|view| {
                Framebuffer::new(
                    Arc::clone(backend),
                    render_pass,
                    &[view.handle(), depth.view()],
                    extent,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        Ok(Self {
            framebuffers,
            depth,
            image_views,
            swapchain,
        })
    }
}

/// Owner of the swapchain object graph.
pub struct SwapchainManager<B: Backend> {
    backend: Arc<B>,
    /// Render pass the framebuffers are created against. Not owned.
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
    /// `None` only between teardown and a failed rebuild.
    chain: Option<SwapchainChain<B>>,
    rebuilds: usize,
}

impl<B: Backend> SwapchainManager<B> {
    /// Builds the first swapchain graph for the provider's current size.
    ///
    /// # Arguments
    ///
    /// * `backend` - Device the objects are created on
    /// * `provider` - Surface provider queried for the framebuffer size
    /// * `render_pass` - Render pass the framebuffers must be compatible
    ///   with; it must stay alive while the manager builds framebuffers
    /// * `depth_format` - Format of the shared depth target
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Surface`] if the provider closes while minimized,
    /// and any creation error of the graph otherwise.
    pub fn new<P>(
        backend: Arc<B>,
        provider: &mut P,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> RhiResult<Self>
    where
        P: SurfaceProvider + ?Sized,
    {
        let size = wait_for_drawable_size(provider).ok_or_else(|| {
            RhiError::Surface("window closed before it had a drawable size".to_string())
        })?;
        let chain = SwapchainChain::build(&backend, render_pass, depth_format, size)?;

        Ok(Self {
            backend,
            render_pass,
            depth_format,
            chain: Some(chain),
            rebuilds: 0,
        })
    }

    /// Tears down and recreates the swapchain graph.
    ///
    /// Waits while the provider reports a zero size, then waits for the
    /// device to go idle before destroying anything. If the provider asks to
    /// close while minimized the current graph is kept and nothing is done.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure; the manager is then left without
    /// a swapchain and the error must be treated as fatal.
    pub fn rebuild<P>(&mut self, provider: &mut P) -> RhiResult<()>
    where
        P: SurfaceProvider + ?Sized,
    {
        let Some(size) = wait_for_drawable_size(provider) else {
            debug!("Close requested while minimized, skipping swapchain rebuild");
            return Ok(());
        };

        self.backend
            .device_wait_idle()
            .map_err(|e| RhiError::runtime("vkDeviceWaitIdle", e))?;

        // Old swapchain is destroyed before the new one is created.
        self.chain = None;
        self.chain = Some(SwapchainChain::build(
            &self.backend,
            self.render_pass,
            self.depth_format,
            size,
        )?);
        self.rebuilds += 1;

        let extent = self.extent();
        info!(
            "Swapchain rebuilt ({}): {}x{}, {} images",
            self.rebuilds,
            extent.width,
            extent.height,
            self.image_count()
        );
        Ok(())
    }

    fn chain(&self) -> RhiResult<&SwapchainChain<B>> {
        self.chain
            .as_ref()
            .ok_or_else(|| RhiError::Surface("swapchain is not built".to_string()))
    }

    /// Acquires the next presentable image, signaling `semaphore`.
    pub fn acquire_next_image(
        &self,
        timeout: Duration,
        semaphore: vk::Semaphore,
    ) -> RhiResult<AcquireOutcome> {
        self.chain()?.swapchain.acquire_next_image(timeout, semaphore)
    }

    /// Presents `image_index` on `queue` once `wait_semaphore` is signaled.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        self.chain()?
            .swapchain
            .present(queue, image_index, wait_semaphore)
    }

    /// Framebuffer for swapchain image `image_index`.
    pub fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        self.chain()?
            .framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| {
                RhiError::Surface(format!("no framebuffer for swapchain image {image_index}"))
            })
    }

    /// Current swapchain extent, or zero if there is no swapchain.
    pub fn extent(&self) -> vk::Extent2D {
        self.chain
            .as_ref()
            .map_or_else(vk::Extent2D::default, |c| c.swapchain.extent())
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |c| c.swapchain.images().len())
    }

    /// Number of framebuffers, one per presentable image.
    pub fn framebuffer_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |c| c.framebuffers.len())
    }

    /// View of the depth target shared by all framebuffers.
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.chain.as_ref().map(|c| c.depth.view())
    }

    /// Completed rebuilds since creation.
    #[inline]
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    /// Swapchain image views, in image index order.
    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.chain.as_ref().map_or_else(Vec::new, |c| {
            c.image_views.iter().map(ImageView::handle).collect()
        })
    }
}

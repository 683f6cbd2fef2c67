//! Presentation surface seam.
//!
//! The renderer never talks to a windowing library directly. It sees a
//! [`SurfaceProvider`], which pumps events, reports the framebuffer size and
//! the resize flag, and creates the `vk::SurfaceKHR` for a given instance.

use std::ffi::c_char;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::debug;

use crate::error::{RhiError, RhiResult};

/// Source of window events and of the presentation surface.
pub trait SurfaceProvider {
    /// Processes pending events without blocking.
    fn poll_events(&mut self);

    /// Processes events, blocking briefly if none are pending.
    fn wait_events(&mut self) {
        self.poll_events();
    }

    /// Whether the user asked to close the window.
    fn should_close(&self) -> bool;

    /// Current framebuffer size in pixels. `(0, 0)` while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Returns and clears the "framebuffer resized" flag.
    fn take_resized(&mut self) -> bool;

    /// Instance extensions needed to create a surface for this window.
    fn required_instance_extensions(&self) -> RhiResult<Vec<*const c_char>>;

    /// Creates a surface for this window on `instance`.
    ///
    /// The caller owns the returned handle.
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RhiResult<vk::SurfaceKHR>;
}

/// Instance extensions required to present to windows on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> RhiResult<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| RhiError::Surface(format!("Failed to enumerate required extensions: {e}")))?;

    debug!(
        "Required Vulkan extensions for surface: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns pointers to static, null-terminated names.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}

/// Creates a surface from raw window handles.
///
/// # Safety
///
/// `display` and `window` must refer to a live window that outlives the
/// returned surface.
pub unsafe fn create_raw_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> RhiResult<vk::SurfaceKHR> {
    // SAFETY: handle validity is the caller's contract.
    unsafe { ash_window::create_surface(entry, instance, display, window, None) }
        .map_err(|e| RhiError::setup("vkCreateSurfaceKHR", e))
}

/// RAII wrapper for a surface and its extension loader.
///
/// The instance must outlive this value.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Asks `provider` for a surface on `instance` and takes ownership of it.
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        provider: &impl SurfaceProvider,
    ) -> RhiResult<Self> {
        let handle = provider.create_surface(entry, instance)?;
        let loader = ash::khr::surface::Instance::new(entry, instance);
        tracing::info!("Vulkan surface created");
        Ok(Self { handle, loader })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for surface capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from this loader's instance, which is still
        // alive, and nothing else destroys it.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

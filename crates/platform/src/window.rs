//! Window management using winit.
//!
//! [`WinitSurfaceProvider`] owns a winit event loop and a single window and
//! drives it by pumping events on demand, so the frame executor keeps
//! control of the host loop.

use std::ffi::c_char;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

use frameloop_core::{Error, RendererConfig, Result};
use frameloop_rhi::surface::{self, SurfaceProvider};
use frameloop_rhi::{RhiError, RhiResult};

/// Timeout used by [`SurfaceProvider::wait_events`].
const WAIT_TIMEOUT: Duration = Duration::from_millis(16);

/// Pump rounds allowed for the platform to deliver the first `resumed`.
const MAX_STARTUP_PUMPS: usize = 64;

/// Builds the attributes of the renderer window.
pub fn window_attributes(config: &RendererConfig) -> WindowAttributes {
    WindowAttributes::default()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .with_resizable(true)
}

/// Event-side state of the window.
struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    creation_error: Option<String>,
    size: (u32, u32),
    resized: bool,
    close_requested: bool,
}

impl WindowState {
    fn new(attributes: WindowAttributes, size: (u32, u32)) -> Self {
        Self {
            attributes,
            window: None,
            creation_error: None,
            size,
            resized: false,
            close_requested: false,
        }
    }

    /// Applies one window event.
    fn handle(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                self.size = (size.width, size.height);
                self.resized = true;
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                self.size = (size.width, size.height);
                info!("Window created: {}x{}", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => self.creation_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        self.handle(&event);
    }
}

/// Winit implementation of [`SurfaceProvider`].
pub struct WinitSurfaceProvider {
    // Declared before the event loop so the window closes first.
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl WinitSurfaceProvider {
    /// Opens the window described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the event loop or the window cannot be
    /// created.
    pub fn new(config: &RendererConfig) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
        let mut provider = Self {
            state: WindowState::new(window_attributes(config), (config.width, config.height)),
            event_loop,
        };

        for _ in 0..MAX_STARTUP_PUMPS {
            provider.pump(Some(WAIT_TIMEOUT));
            if let Some(err) = provider.state.creation_error.take() {
                return Err(Error::Window(err));
            }
            if provider.state.window.is_some() {
                return Ok(provider);
            }
            if provider.state.close_requested {
                break;
            }
        }

        Err(Error::Window("event loop never resumed".to_string()))
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }

    fn window(&self) -> RhiResult<&Window> {
        self.state
            .window
            .as_ref()
            .ok_or_else(|| RhiError::Surface("window is not open".to_string()))
    }
}

impl SurfaceProvider for WinitSurfaceProvider {
    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(Some(WAIT_TIMEOUT));
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        match &self.state.window {
            Some(window) => {
                let size = window.inner_size();
                (size.width, size.height)
            }
            None => self.state.size,
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn required_instance_extensions(&self) -> RhiResult<Vec<*const c_char>> {
        let display = self
            .window()?
            .display_handle()
            .map_err(|e| RhiError::Surface(format!("Failed to get display handle: {e}")))?;
        surface::required_extensions(display.as_raw())
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RhiResult<vk::SurfaceKHR> {
        let window = self.window()?;
        let display = window
            .display_handle()
            .map_err(|e| RhiError::Surface(format!("Failed to get display handle: {e}")))?;
        let handle = window
            .window_handle()
            .map_err(|e| RhiError::Surface(format!("Failed to get window handle: {e}")))?;

        // SAFETY: both handles come from the live window owned by `self`, and
        // the device that owns the surface is dropped before this provider.
        unsafe { surface::create_raw_surface(entry, instance, display.as_raw(), handle.as_raw()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn test_window_attributes_follow_config() {
        let config = RendererConfig {
            title: "quads".to_string(),
            width: 640,
            height: 480,
            ..Default::default()
        };
        let attrs = window_attributes(&config);

        assert_eq!(attrs.title, "quads");
        assert!(attrs.resizable);
        assert_eq!(
            attrs.inner_size,
            Some(Size::Physical(PhysicalSize::new(640, 480)))
        );
    }

    #[test]
    fn test_resize_event_raises_flag() {
        let mut state = WindowState::new(WindowAttributes::default(), (800, 600));
        state.handle(&WindowEvent::Resized(PhysicalSize::new(1024, 768)));

        assert_eq!(state.size, (1024, 768));
        assert!(state.resized);
        assert!(!state.close_requested);
    }

    #[test]
    fn test_close_event_requests_close() {
        let mut state = WindowState::new(WindowAttributes::default(), (800, 600));
        state.handle(&WindowEvent::CloseRequested);

        assert!(state.close_requested);
        assert!(!state.resized);
    }

    #[test]
    fn test_minimize_reports_zero_size() {
        let mut state = WindowState::new(WindowAttributes::default(), (800, 600));
        state.handle(&WindowEvent::Resized(PhysicalSize::new(0, 0)));
        assert_eq!(state.size, (0, 0));
    }
}

//! Platform layer for the frameloop renderer.
//!
//! This crate provides the winit-backed presentation surface provider:
//! - Window creation from the renderer configuration
//! - On-demand event pumping (poll and short wait)
//! - Resize and close tracking
//! - Vulkan surface creation from raw window handles

mod window;

pub use window::{WinitSurfaceProvider, window_attributes};

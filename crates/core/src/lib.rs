//! Core utilities for the frameloop renderer.
//!
//! This crate provides foundational types shared by every other crate:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Immutable renderer configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{DEFAULT_FRAMES_IN_FLIGHT, RendererConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;

//! Immutable renderer configuration.
//!
//! A [`RendererConfig`] is built once at startup, either from defaults or from
//! a TOML file, and then handed by value to the frame executor. Nothing
//! mutates it afterwards.
//!
//! # Example
//!
//! ```
//! use frameloop_core::RendererConfig;
//!
//! let config = RendererConfig::from_toml_str("width = 1024\nframes_in_flight = 3").unwrap();
//! assert_eq!(config.width, 1024);
//! assert_eq!(config.height, 600);
//! assert_eq!(config.frames_in_flight, 3);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Number of frame slots used when the configuration does not say otherwise.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Startup configuration for the window and the frame executor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Window title.
    pub title: String,
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
    /// Number of frame slots in the synchronization ring.
    pub frames_in_flight: usize,
    /// Upper bound for the per-slot fence wait, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Upper bound for swapchain image acquisition, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Validation layer toggle. `None` enables it in debug builds only.
    pub validation: Option<bool>,
    /// Directory holding the precompiled SPIR-V binaries.
    pub shader_dir: PathBuf,
    /// File name of the vertex shader binary inside `shader_dir`.
    pub vertex_shader: String,
    /// File name of the fragment shader binary inside `shader_dir`.
    pub fragment_shader: String,
    /// RGBA clear color for the color attachment.
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "frameloop".to_string(),
            width: 800,
            height: 600,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            fence_timeout_ms: 5_000,
            acquire_timeout_ms: 5_000,
            validation: None,
            shader_dir: PathBuf::from("shaders"),
            vertex_shader: "shader.vert.spv".to_string(),
            fragment_shader: "shader.frag.spv".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RendererConfig {
    /// Parses a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed TOML or unknown keys, and
    /// [`Error::InvalidConfig`] if the values fail [`RendererConfig::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise the same
    /// errors as [`RendererConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    /// Checks the values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "window size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fence_timeout_ms == 0 || self.acquire_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "fence and acquire timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Fence wait bound as a [`Duration`].
    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Image acquisition bound as a [`Duration`].
    #[inline]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Whether validation layers should be requested.
    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Full path of the vertex shader binary.
    pub fn vertex_shader_path(&self) -> PathBuf {
        self.shader_dir.join(&self.vertex_shader)
    }

    /// Full path of the fragment shader binary.
    pub fn fragment_shader_path(&self) -> PathBuf {
        self.shader_dir.join(&self.fragment_shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            title = "demo"
            fence_timeout_ms = 250
            validation = false
            "#,
        )
        .unwrap();

        assert_eq!(config.title, "demo");
        assert_eq!(config.fence_timeout(), Duration::from_millis(250));
        assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
        assert!(!config.validation_enabled());
        assert_eq!(config.width, 800);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let result = RendererConfig::from_toml_str("frames_in_flight = 0");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = RendererConfig {
            height: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = RendererConfig::from_toml_str("acquire_timeout_ms = 0");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let result = RendererConfig::from_toml_str("max_frames = 3");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_shader_paths_join_dir() {
        let config = RendererConfig {
            shader_dir: PathBuf::from("assets/spv"),
            ..Default::default()
        };
        assert_eq!(
            config.vertex_shader_path(),
            PathBuf::from("assets/spv/shader.vert.spv")
        );
        assert_eq!(
            config.fragment_shader_path(),
            PathBuf::from("assets/spv/shader.frag.spv")
        );
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = RendererConfig::load("/nonexistent/frameloop.toml");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}

//! Error types for configuration and windowing.

use thiserror::Error;

/// Main error type for the non-GPU parts of the renderer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event loop errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values that parse but cannot be used
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_message() {
        let err = Error::InvalidConfig("frames_in_flight must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid config: frames_in_flight must be at least 1"
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn open_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/a/real/frameloop.toml")?)
        }
        assert!(matches!(open_missing(), Err(Error::Io(_))));
    }
}

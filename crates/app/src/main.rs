//! frameloop - Main Entry Point
//!
//! Opens a window and renders two spinning textured quads until the window
//! is closed.
//!
//! Configuration is read from the file named by `FRAMELOOP_CONFIG`, else
//! from `frameloop.toml` in the working directory if present, else defaults
//! apply.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use frameloop_core::RendererConfig;
use frameloop_platform::WinitSurfaceProvider;
use frameloop_renderer::{FrameExecutor, ShaderBinaries};
use frameloop_rhi::device::VulkanDevice;

const CONFIG_ENV: &str = "FRAMELOOP_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "frameloop.toml";

fn load_config() -> Result<RendererConfig> {
    let path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()));

    let config = match path {
        Some(path) => RendererConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RendererConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    frameloop_core::init_logging();
    info!("Starting frameloop");

    let config = load_config()?;
    let mut provider = WinitSurfaceProvider::new(&config)?;
    let device = VulkanDevice::new(config.validation_enabled(), &provider)
        .context("Failed to initialize Vulkan")?;
    let shaders = ShaderBinaries::load(&config).context("Failed to load shaders")?;

    let executor = FrameExecutor::new(device, &mut provider, config, &shaders)?;
    executor.run_to_completion(&mut provider)?;

    info!("Exited cleanly");
    Ok(())
}

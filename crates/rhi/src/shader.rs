//! Shader module management.
//!
//! SPIR-V binaries are read from disk with [`load_spirv`] and turned into
//! [`ShaderModule`]s. Modules are only needed while the pipeline is built and
//! can be dropped right after.
//!
//! # Overview
//!
//! - [`ShaderStage`] - which pipeline stage a module feeds
//! - [`load_spirv`] - reads and validates a SPIR-V file
//! - [`ShaderModule`] - wraps `vk::ShaderModule` with its stage and entry point
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::shader::{load_spirv, ShaderModule, ShaderStage};
//!
//! # fn example(device: Arc<VulkanDevice>) -> Result<(), frameloop_rhi::RhiError> {
//! let code = load_spirv(Path::new("shaders/shader.vert.spv"))?;
//! let vertex = ShaderModule::new(device, &code, ShaderStage::Vertex)?;
//! let _stage_info = vertex.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Entry point name shared by all shaders.
pub const ENTRY_POINT: &CStr = c"main";

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Reads a SPIR-V binary into 32-bit code words.
///
/// # Errors
///
/// Returns [`RhiError::ShaderNotFound`] if the file cannot be read, and
/// [`RhiError::InvalidShader`] if its length is not a multiple of four or it
/// does not start with the SPIR-V magic number.
pub fn load_spirv(path: &Path) -> RhiResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RhiError::ShaderNotFound {
        path: path.to_path_buf(),
        source,
    })?;

    let code = parse_spirv(&bytes).map_err(|source| RhiError::InvalidShader {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Loaded {} SPIR-V words from {}", code.len(), path.display());
    Ok(code)
}

/// Decodes SPIR-V bytes, accepting either byte order.
pub fn parse_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    let code = ash::util::read_spv(&mut Cursor::new(bytes))?;
    if code.first() != Some(&SPIRV_MAGIC) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "missing SPIR-V magic number",
        ));
    }
    Ok(code)
}

/// Shader module wrapper.
pub struct ShaderModule<B: Backend> {
    /// Backend that created the module.
    backend: Arc<B>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
    /// Shader stage type.
    stage: ShaderStage,
}

impl<B: Backend> ShaderModule<B> {
    /// Creates a shader module from SPIR-V code words.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if module creation fails.
    pub fn new(backend: Arc<B>, code: &[u32], stage: ShaderStage) -> RhiResult<Self> {
        let module = backend
            .create_shader_module(code)
            .map_err(|e| RhiError::setup("vkCreateShaderModule", e))?;

        info!("Created {} shader module", stage);

        Ok(Self {
            backend,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage description for pipeline creation. Borrows this module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl<B: Backend> Drop for ShaderModule<B> {
    fn drop(&mut self) {
        self.backend.destroy_shader_module(self.module);
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "frameloop-shader-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_spirv(Path::new("/nonexistent/shader.vert.spv")).unwrap_err();
        assert!(matches!(err, RhiError::ShaderNotFound { .. }));
    }

    #[test]
    fn test_load_misaligned_file() {
        let path = temp_file("misaligned.spv", &[0x03, 0x02, 0x23, 0x07, 0x00]);
        let err = load_spirv(&path).unwrap_err();
        assert!(matches!(err, RhiError::InvalidShader { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_without_magic() {
        let path = temp_file("nomagic.spv", &[0u8; 8]);
        let err = load_spirv(&path).unwrap_err();
        assert!(matches!(err, RhiError::InvalidShader { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_valid_words() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let path = temp_file("valid.spv", &bytes);

        let code = load_spirv(&path).unwrap();
        assert_eq!(code, vec![SPIRV_MAGIC, 0x0001_0000]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_parse_big_endian() {
        let mut bytes = SPIRV_MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&7u32.to_be_bytes());
        assert_eq!(parse_spirv(&bytes).unwrap(), vec![SPIRV_MAGIC, 7]);
    }
}

//! The fixed graphics pipeline.
//!
//! One pipeline draws the whole scene:
//!
//! - Vertex input: [`Vertex`] at binding 0, locations 0/1/2
//! - Set 0, binding 0: [`TransformUbo`](crate::ubo::TransformUbo) (vertex stage)
//! - Set 0, binding 1: combined image sampler (fragment stage)
//! - Back-face culling, counter-clockwise front faces, depth test LESS
//!
//! Shader modules only live while the pipeline is being built.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use frameloop_core::RendererConfig;
use frameloop_rhi::RhiResult;
use frameloop_rhi::backend::Backend;
use frameloop_rhi::descriptor::{DescriptorBindingBuilder, DescriptorSetLayout};
use frameloop_rhi::pipeline::{
    CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout, RenderPass,
};
use frameloop_rhi::shader::{ShaderModule, ShaderStage, load_spirv};
use frameloop_rhi::vertex::Vertex;

/// Binding of the per-frame uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;

/// Binding of the texture sampler.
pub const SAMPLER_BINDING: u32 = 1;

/// SPIR-V words of the vertex and fragment shaders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBinaries {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBinaries {
    /// Loads both shaders named by `config` from its shader directory.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderNotFound`](frameloop_rhi::RhiError::ShaderNotFound)
    /// or [`RhiError::InvalidShader`](frameloop_rhi::RhiError::InvalidShader)
    /// for the first shader that cannot be used.
    pub fn load(config: &RendererConfig) -> RhiResult<Self> {
        Self::from_paths(config.vertex_shader_path(), config.fragment_shader_path())
    }

    pub fn from_paths(vertex: PathBuf, fragment: PathBuf) -> RhiResult<Self> {
        Ok(Self {
            vertex: load_spirv(&vertex)?,
            fragment: load_spirv(&fragment)?,
        })
    }
}

/// Descriptor set layout bindings of the fixed pipeline.
pub fn descriptor_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        DescriptorBindingBuilder::uniform_buffer(UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX),
        DescriptorBindingBuilder::combined_image_sampler(
            SAMPLER_BINDING,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

/// Pipeline, pipeline layout and descriptor set layout.
///
/// Fields drop in declaration order, pipeline first.
pub struct DrawPipeline<B: Backend> {
    pipeline: Pipeline<B>,
    layout: PipelineLayout<B>,
    descriptor_set_layout: DescriptorSetLayout<B>,
}

impl<B: Backend> DrawPipeline<B> {
    /// Builds the pipeline for subpass 0 of `render_pass`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`](frameloop_rhi::RhiError::Setup) naming the
    /// failing call. Everything created before the failure is released.
    pub fn new(
        backend: Arc<B>,
        render_pass: &RenderPass<B>,
        shaders: &ShaderBinaries,
    ) -> RhiResult<Self> {
        let descriptor_set_layout =
            DescriptorSetLayout::new(Arc::clone(&backend), &descriptor_bindings())?;
        let layout = PipelineLayout::new(Arc::clone(&backend), &[descriptor_set_layout.handle()])?;

        let vertex = ShaderModule::new(Arc::clone(&backend), &shaders.vertex, ShaderStage::Vertex)?;
        let fragment =
            ShaderModule::new(Arc::clone(&backend), &shaders.fragment, ShaderStage::Fragment)?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .depth_test(true, true)
            .build(backend, &layout, render_pass)?;

        info!("Draw pipeline ready");

        Ok(Self {
            pipeline,
            layout,
            descriptor_set_layout,
        })
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout.handle()
    }
}

//! Render passes, framebuffers and graphics pipelines.
//!
//! # Overview
//!
//! - [`RenderPass`] wraps a single-subpass color + depth render pass
//! - [`Framebuffer`] binds concrete image views to a render pass
//! - [`PipelineLayout`] wraps the descriptor set layouts a pipeline sees
//! - [`Pipeline`] wraps a graphics pipeline
//! - [`GraphicsPipelineBuilder`] assembles the fixed-function state
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::device::VulkanDevice;
//! use frameloop_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout, RenderPass};
//! use frameloop_rhi::shader::ShaderModule;
//! use frameloop_rhi::vertex::Vertex;
//! use ash::vk;
//!
//! # fn example(
//! #     device: Arc<VulkanDevice>,
//! #     vertex: &ShaderModule<VulkanDevice>,
//! #     fragment: &ShaderModule<VulkanDevice>,
//! # ) -> Result<(), frameloop_rhi::RhiError> {
//! let render_pass = RenderPass::color_depth(
//!     device.clone(),
//!     vk::Format::B8G8R8A8_SRGB,
//!     vk::Format::D32_SFLOAT,
//! )?;
//! let layout = PipelineLayout::new(device.clone(), &[])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .vertex_shader(vertex)
//!     .fragment_shader(fragment)
//!     .vertex_binding(Vertex::binding_description())
//!     .vertex_attributes(&Vertex::attribute_descriptions())
//!     .build(device, &layout, &render_pass)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};
use crate::shader::ShaderModule;

/// Render pass wrapper.
pub struct RenderPass<B: Backend> {
    backend: Arc<B>,
    render_pass: vk::RenderPass,
}

impl<B: Backend> RenderPass<B> {
    /// Creates a render pass with one color and one depth attachment.
    ///
    /// The color attachment is cleared, stored and left in
    /// `PRESENT_SRC_KHR`. The depth attachment is cleared and discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] if creation fails.
    pub fn color_depth(
        backend: Arc<B>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = backend
            .create_render_pass(&info)
            .map_err(|e| RhiError::setup("vkCreateRenderPass", e))?;

        info!(
            "Render pass created (color {:?}, depth {:?})",
            color_format, depth_format
        );

        Ok(Self {
            backend,
            render_pass,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl<B: Backend> Drop for RenderPass<B> {
    fn drop(&mut self) {
        self.backend.destroy_render_pass(self.render_pass);
        debug!("Render pass destroyed");
    }
}

/// Framebuffer wrapper.
pub struct Framebuffer<B: Backend> {
    backend: Arc<B>,
    framebuffer: vk::Framebuffer,
}

impl<B: Backend> Framebuffer<B> {
    /// Creates a framebuffer over `attachments`, in render pass order.
    pub fn new(
        backend: Arc<B>,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let framebuffer = backend
            .create_framebuffer(render_pass, attachments, extent)
            .map_err(|e| RhiError::setup("vkCreateFramebuffer", e))?;

        Ok(Self {
            backend,
            framebuffer,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl<B: Backend> Drop for Framebuffer<B> {
    fn drop(&mut self) {
        self.backend.destroy_framebuffer(self.framebuffer);
    }
}

/// Pipeline layout wrapper.
pub struct PipelineLayout<B: Backend> {
    backend: Arc<B>,
    layout: vk::PipelineLayout,
}

impl<B: Backend> PipelineLayout<B> {
    /// Creates a pipeline layout over the given descriptor set layouts.
    pub fn new(backend: Arc<B>, set_layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Self> {
        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);

        let layout = backend
            .create_pipeline_layout(&info)
            .map_err(|e| RhiError::setup("vkCreatePipelineLayout", e))?;

        debug!(
            "Created pipeline layout with {} descriptor set layout(s)",
            set_layouts.len()
        );

        Ok(Self { backend, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl<B: Backend> Drop for PipelineLayout<B> {
    fn drop(&mut self) {
        self.backend.destroy_pipeline_layout(self.layout);
        debug!("Pipeline layout destroyed");
    }
}

/// Graphics pipeline wrapper.
pub struct Pipeline<B: Backend> {
    backend: Arc<B>,
    pipeline: vk::Pipeline,
}

impl<B: Backend> Pipeline<B> {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl<B: Backend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.pipeline);
        info!("Graphics pipeline destroyed");
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding order of front-facing triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Builder for the graphics pipeline.
///
/// Defaults: triangle list, fill mode, back-face culling, counter-clockwise
/// front faces, one sample, depth test `LESS` with writes, no blending, and
/// dynamic viewport and scissor.
pub struct GraphicsPipelineBuilder<'a, B: Backend> {
    // Shader stages
    vertex_shader: Option<&'a ShaderModule<B>>,
    fragment_shader: Option<&'a ShaderModule<B>>,

    // Vertex input state
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,

    // Rasterization state
    cull_mode: CullMode,
    front_face: FrontFace,

    // Depth state
    depth_test_enable: bool,
    depth_write_enable: bool,
}

impl<B: Backend> Default for GraphicsPipelineBuilder<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, B: Backend> GraphicsPipelineBuilder<'a, B> {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_test_enable: true,
            depth_write_enable: true,
        }
    }

    pub fn vertex_shader(mut self, shader: &'a ShaderModule<B>) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    pub fn fragment_shader(mut self, shader: &'a ShaderModule<B>) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn depth_test(mut self, test: bool, write: bool) -> Self {
        self.depth_test_enable = test;
        self.depth_write_enable = write;
        self
    }

    /// Builds the pipeline for subpass 0 of `render_pass`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Setup`] naming `vkCreateGraphicsPipelines` if a
    /// shader stage is missing or creation fails.
    pub fn build(
        self,
        backend: Arc<B>,
        layout: &PipelineLayout<B>,
        render_pass: &RenderPass<B>,
    ) -> RhiResult<Pipeline<B>> {
        let (Some(vertex_shader), Some(fragment_shader)) =
            (self.vertex_shader, self.fragment_shader)
        else {
            return Err(RhiError::setup(
                "vkCreateGraphicsPipelines",
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ));
        };

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are fixed here.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test_enable)
            .depth_write_enable(self.depth_write_enable)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipeline = backend
            .create_graphics_pipeline(&create_info)
            .map_err(|e| RhiError::setup("vkCreateGraphicsPipelines", e))?;

        info!("Graphics pipeline created");

        Ok(Pipeline { backend, pipeline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};
    use crate::shader::ShaderStage;

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::default(), CullMode::Back);
    }

    #[test]
    fn test_front_face_to_vk() {
        assert_eq!(
            FrontFace::CounterClockwise.to_vk(),
            vk::FrontFace::COUNTER_CLOCKWISE
        );
        assert_eq!(FrontFace::Clockwise.to_vk(), vk::FrontFace::CLOCKWISE);
    }

    #[test]
    fn test_build_requires_both_shaders() {
        let backend = Arc::new(MockBackend::new());
        let render_pass = RenderPass::color_depth(
            Arc::clone(&backend),
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        let layout = PipelineLayout::new(Arc::clone(&backend), &[]).unwrap();
        let vertex = ShaderModule::new(Arc::clone(&backend), &[0x0723_0203], ShaderStage::Vertex)
            .unwrap();

        let result = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .build(Arc::clone(&backend), &layout, &render_pass);
        assert!(matches!(
            result,
            Err(RhiError::Setup {
                operation: "vkCreateGraphicsPipelines",
                ..
            })
        ));
        assert_eq!(backend.created(ObjectKind::Pipeline), 0);
    }

    #[test]
    fn test_build_and_release() {
        let backend = Arc::new(MockBackend::new());
        {
            let render_pass = RenderPass::color_depth(
                Arc::clone(&backend),
                vk::Format::B8G8R8A8_SRGB,
                vk::Format::D32_SFLOAT,
            )
            .unwrap();
            let layout = PipelineLayout::new(Arc::clone(&backend), &[]).unwrap();
            let vertex =
                ShaderModule::new(Arc::clone(&backend), &[0x0723_0203], ShaderStage::Vertex)
                    .unwrap();
            let fragment =
                ShaderModule::new(Arc::clone(&backend), &[0x0723_0203], ShaderStage::Fragment)
                    .unwrap();

            let _pipeline = GraphicsPipelineBuilder::new()
                .vertex_shader(&vertex)
                .fragment_shader(&fragment)
                .build(Arc::clone(&backend), &layout, &render_pass)
                .unwrap();
            assert_eq!(backend.live(ObjectKind::Pipeline), 1);
        }
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn test_pipeline_failure_names_call() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("vkCreateRenderPass", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let result = RenderPass::color_depth(
            Arc::clone(&backend),
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
        );
        assert!(matches!(
            result,
            Err(RhiError::Setup {
                operation: "vkCreateRenderPass",
                result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            })
        ));
    }
}

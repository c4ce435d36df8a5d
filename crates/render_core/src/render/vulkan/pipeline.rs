//! Graphics pipeline state object
//!
//! Compiles a [`PipelineConfiguration`] and a set of shader stages into a
//! pipeline together with the render pass and layouts it was built against.
//! The object is immutable; a new configuration means building a new one and
//! dropping the old one once the device is idle.

use ash::{vk, Device};

use super::descriptor::DescriptorSetLayout;
use super::error::{VulkanError, VulkanResult};
use super::pipeline_config::PipelineConfiguration;
use super::render_pass::RenderPass;
use super::shader::{ShaderKind, ShaderStage};

/// Compiled graphics pipeline and the objects it depends on
pub struct PipelineStateObject {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
    render_pass: RenderPass,
    configuration: PipelineConfiguration,
}

impl PipelineStateObject {
    /// Build a pipeline drawing into a single `color_format` attachment
    pub fn build(
        device: &Device,
        configuration: &PipelineConfiguration,
        stages: &[ShaderStage],
        color_format: vk::Format,
    ) -> VulkanResult<Self> {
        configuration.validate()?;
        if !stages.iter().any(|s| s.kind() == ShaderKind::Vertex) {
            return Err(VulkanError::PipelineCreationFailed(
                "Pipeline needs a vertex stage".to_string(),
            ));
        }

        let render_pass = RenderPass::new_color_pass(device.clone(), color_format)?;
        let set_layouts = DescriptorSetLayout::from_configuration(device, configuration)?;

        let set_layout_handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(DescriptorSetLayout::handle).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layout_handles);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| VulkanError::PipelineCreationFailed(format!("Pipeline layout: {e:?}")))?;

        // Owns the layout from here so early returns clean it up.
        let mut pso = Self {
            device: device.clone(),
            pipeline: vk::Pipeline::null(),
            layout,
            set_layouts,
            render_pass,
            configuration: configuration.clone(),
        };
        pso.pipeline = pso.create_pipeline(stages)?;

        log::debug!(
            "Built pipeline: {:?}/{:?}, cull {:?}, blend {:?}",
            configuration.topology,
            configuration.polygon_mode,
            configuration.cull_mode,
            configuration.blend_mode
        );
        Ok(pso)
    }

    fn create_pipeline(&self, stages: &[ShaderStage]) -> VulkanResult<vk::Pipeline> {
        let config = &self.configuration;
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages.iter().map(ShaderStage::create_info).collect();

        let bindings = config.vk_vertex_bindings();
        let attributes = config.vk_vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(config.topology.to_vk())
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are fixed here.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode.to_vk())
            .line_width(1.0)
            .cull_mode(config.cull_mode.to_vk())
            .front_face(config.front_face.to_vk())
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [config.blend_mode.attachment_state()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass.handle())
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        }
        .map_err(|(_, e)| VulkanError::PipelineCreationFailed(format!("vkCreateGraphicsPipelines: {e:?}")))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::PipelineCreationFailed("No pipeline returned".to_string()))
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get pipeline layout
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor set layouts in set-number order
    pub fn set_layouts(&self) -> &[DescriptorSetLayout] {
        &self.set_layouts
    }

    /// Render pass the pipeline is compatible with
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Configuration the pipeline was built from
    pub fn configuration(&self) -> &PipelineConfiguration {
        &self.configuration
    }
}

impl Drop for PipelineStateObject {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

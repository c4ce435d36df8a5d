//! Renderer facade
//!
//! [`Renderer`] owns every GPU object for a single-pass, single-pipeline
//! frame loop and drives it one frame at a time. It holds no window; every
//! call that may need to wait for a drawable surface takes one.
//!
//! Fields are declared in destruction order. The device context is last, and
//! `Drop` waits for the device to go idle before any field is released.

use std::path::Path;

use ash::vk;

use super::buffer::{IndexBuffer, UniformBuffers, VertexBuffer};
use super::context::DeviceContext;
use super::descriptor::FrameDescriptorSets;
use super::error::{VulkanError, VulkanResult};
use super::frame::{FrameBegin, FrameScheduler, FrameSlotTracker, FrameToken, PresentOutcome};
use super::pipeline::PipelineStateObject;
use super::pipeline_config::PipelineConfiguration;
use super::recorder::{self, DrawState, RenderTarget};
use super::shader::ShaderStage;
use super::swapchain::{choose_surface_format, SwapchainManager, SwapchainSupport};
use super::texture::Texture;
use super::vertex::{UniformBufferObject, Vertex};
use super::window::SurfaceWindow;
use crate::config::RendererConfig;

/// What [`Renderer::draw_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented
    Rendered,
    /// The frame was presented, then the swapchain was rebuilt
    RenderedAndRecreated,
    /// The swapchain was stale; it was rebuilt and the frame dropped
    Dropped,
}

impl FrameStatus {
    /// Whether a frame reached the presentation queue
    pub fn is_rendered(self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

struct Mesh {
    vertices: VertexBuffer,
    indices: IndexBuffer,
}

/// Vulkan renderer for one window
pub struct Renderer {
    frames: FrameScheduler,
    uniforms: UniformBuffers<UniformBufferObject>,
    descriptors: FrameDescriptorSets,
    mesh: Option<Mesh>,
    texture: Texture,
    swapchain: SwapchainManager,
    pipeline: PipelineStateObject,
    shader_stages: Vec<ShaderStage>,
    clear_color: [f32; 4],
    resize_requested: bool,
    frames_rendered: u64,
    context: DeviceContext,
}

impl Renderer {
    /// Initialize the device, swapchain and pipeline for `window`
    ///
    /// Shaders are loaded from `config.shaders`. The sampled texture comes
    /// from `config.texture_path`, or is opaque white when none is set.
    pub fn new<W: SurfaceWindow + ?Sized>(
        window: &mut W,
        config: &RendererConfig,
        pipeline_config: &PipelineConfiguration,
    ) -> VulkanResult<Self> {
        config
            .validate_settings()
            .map_err(VulkanError::InitializationFailed)?;

        let context = DeviceContext::new(
            window,
            &config.application_name,
            config.application_version,
            config.validation_enabled(),
        )?;

        let shader_stages = ShaderStage::from_config(context.device(), &config.shaders)?;
        let color_format = preferred_color_format(&context)?;
        let pipeline = PipelineStateObject::build(context.device(), pipeline_config, &shader_stages, color_format)?;
        let mut swapchain = SwapchainManager::new(&context, window, pipeline.render_pass().handle())?;

        let pipeline = if swapchain.format() == color_format {
            pipeline
        } else {
            log::warn!(
                "Swapchain format {:?} differs from queried {color_format:?}, rebuilding pipeline",
                swapchain.format()
            );
            let rebuilt =
                PipelineStateObject::build(context.device(), pipeline_config, &shader_stages, swapchain.format())?;
            swapchain.set_render_pass(&context, rebuilt.render_pass().handle())?;
            rebuilt
        };

        let frames = FrameScheduler::new(&context, config.max_frames_in_flight)?;
        let frames_in_flight = frames.frames_in_flight();

        let mut uniforms = UniformBuffers::new(&context, frames_in_flight)?;
        for slot in 0..frames_in_flight {
            uniforms.update(slot, &UniformBufferObject::identity())?;
        }

        let texture = match &config.texture_path {
            Some(path) => Texture::from_file(&context, path)?,
            None => Texture::default_white(&context)?,
        };

        let descriptors = FrameDescriptorSets::new(
            context.device(),
            pipeline.configuration(),
            pipeline.set_layouts(),
            frames_in_flight,
        )?;
        descriptors.write_frame_resources(context.device(), pipeline.configuration(), &uniforms, &texture)?;

        let extent = swapchain.extent();
        log::info!(
            "Renderer ready: {}x{} {:?}, {frames_in_flight} frames in flight",
            extent.width,
            extent.height,
            swapchain.format()
        );

        Ok(Self {
            frames,
            uniforms,
            descriptors,
            mesh: None,
            texture,
            swapchain,
            pipeline,
            shader_stages,
            clear_color: config.clear_color,
            resize_requested: false,
            frames_rendered: 0,
            context,
        })
    }

    /// Upload a mesh to device-local memory, replacing the current one
    ///
    /// Every index must address one of `vertices`.
    pub fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u16]) -> VulkanResult<()> {
        validate_mesh(vertices, indices)?;

        let vertex_buffer = VertexBuffer::new(&self.context, vertices)?;
        let index_buffer = IndexBuffer::new(&self.context, indices)?;

        // The previous mesh may still be referenced by submitted frames.
        self.frames.wait_all()?;
        self.mesh = Some(Mesh {
            vertices: vertex_buffer,
            indices: index_buffer,
        });

        log::debug!("Uploaded mesh: {} vertices, {} indices", vertices.len(), indices.len());
        Ok(())
    }

    /// Decode an image file and bind it as the sampled texture
    pub fn set_texture_from_file(&mut self, path: impl AsRef<Path>) -> VulkanResult<()> {
        let texture = Texture::from_file(&self.context, path)?;
        self.set_texture(texture)
    }

    /// Bind `texture` to every frame slot's sampler bindings
    pub fn set_texture(&mut self, texture: Texture) -> VulkanResult<()> {
        self.frames.wait_all()?;
        self.descriptors.write_frame_resources(
            self.context.device(),
            self.pipeline.configuration(),
            &self.uniforms,
            &texture,
        )?;
        self.texture = texture;
        Ok(())
    }

    /// Write `ubo` into the uniform buffer of `slot`
    ///
    /// Fails if the slot's previous submission has not been observed complete.
    pub fn update_uniform(&mut self, slot: usize, ubo: &UniformBufferObject) -> VulkanResult<()> {
        if self.frames.tracker().is_pending(slot) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Uniform buffer of frame slot {slot} is in use by the GPU"),
            });
        }
        self.uniforms.update(slot, ubo)
    }

    /// Wait for the current slot and acquire a swapchain image
    pub fn begin_frame(&mut self) -> VulkanResult<FrameBegin> {
        self.frames.begin_frame(&self.context, self.swapchain.swapchain())
    }

    /// Record the draw for `token` into its command buffer
    pub fn record_frame(&self, token: &FrameToken) -> VulkanResult<()> {
        let framebuffer = self
            .swapchain
            .framebuffer(token.image_index())
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No framebuffer for swapchain image {}", token.image_index()),
            })?;

        let target = RenderTarget {
            render_pass: self.pipeline.render_pass().handle(),
            framebuffer: framebuffer.handle(),
            extent: self.swapchain.extent(),
        };

        let (vertex_buffers, index_buffer, index_count) = match &self.mesh {
            Some(mesh) => (
                vec![mesh.vertices.handle()],
                mesh.indices.handle(),
                mesh.indices.index_count(),
            ),
            None => (Vec::new(), vk::Buffer::null(), 0),
        };

        let draw = DrawState {
            pipeline: self.pipeline.handle(),
            layout: self.pipeline.layout(),
            vertex_buffers: &vertex_buffers,
            index_buffer,
            index_count,
            descriptor_sets: self.descriptors.sets(token.slot()),
        };

        recorder::record_frame(
            self.context.device(),
            token.command_buffer(),
            &target,
            &draw,
            self.clear_color,
        )
    }

    /// Submit and present the frame recorded for `token`
    pub fn end_frame(&mut self, token: FrameToken) -> VulkanResult<PresentOutcome> {
        let outcome = self.frames.end_frame(
            &self.context,
            self.swapchain.swapchain(),
            token,
            self.resize_requested,
        )?;
        self.frames_rendered += 1;
        Ok(outcome)
    }

    /// Drop a begun frame, presenting its image unrendered
    pub fn abandon_frame(&mut self, token: FrameToken) -> VulkanResult<()> {
        self.frames.abandon_frame(&self.context, self.swapchain.swapchain(), token)
    }

    /// Run one full frame with `ubo`, recreating the swapchain when needed
    pub fn draw_frame<W: SurfaceWindow + ?Sized>(
        &mut self,
        window: &mut W,
        ubo: &UniformBufferObject,
    ) -> VulkanResult<FrameStatus> {
        let token = match self.begin_frame()? {
            FrameBegin::Ready(token) => token,
            FrameBegin::SwapchainStale => {
                self.recreate_swapchain(window)?;
                return Ok(FrameStatus::Dropped);
            }
        };

        let recorded = self
            .update_uniform(token.slot(), ubo)
            .and_then(|()| self.record_frame(&token));
        if let Err(e) = recorded {
            if let Err(release_error) = self.abandon_frame(token) {
                log::warn!("Failed to release abandoned frame: {release_error}");
            }
            return Err(e);
        }

        match self.end_frame(token)? {
            PresentOutcome::Presented => Ok(FrameStatus::Rendered),
            PresentOutcome::NeedsRecreate => {
                self.recreate_swapchain(window)?;
                Ok(FrameStatus::RenderedAndRecreated)
            }
        }
    }

    /// Flag that the window was resized; the swapchain is rebuilt after the
    /// next present
    pub fn notify_resized(&mut self) {
        self.resize_requested = true;
    }

    /// Whether a resize is waiting to be handled
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Rebuild the swapchain for the window's current size
    ///
    /// Blocks while the window has a zero-sized framebuffer. The pipeline is
    /// rebuilt if the surface format changed.
    pub fn recreate_swapchain<W: SurfaceWindow + ?Sized>(&mut self, window: &mut W) -> VulkanResult<()> {
        self.frames.wait_all()?;
        self.swapchain.recreate_images(&self.context, window)?;
        self.resize_requested = false;

        // Framebuffers are built against whichever render pass matches the new format.
        let format = self.swapchain.format();
        if format != self.pipeline.render_pass().color_format() {
            log::info!("Surface format changed to {format:?}, rebuilding pipeline");
            let configuration = self.pipeline.configuration().clone();
            self.rebuild_pipeline(&configuration)?;
        } else {
            self.swapchain
                .set_render_pass(&self.context, self.pipeline.render_pass().handle())?;
        }

        let extent = self.swapchain.extent();
        log::info!("Swapchain recreated: {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Replace the pipeline with one built from `configuration`
    ///
    /// Waits for the device to go idle before the old pipeline is released.
    /// Descriptor sets are reallocated for the new declarations.
    pub fn rebuild_pipeline(&mut self, configuration: &PipelineConfiguration) -> VulkanResult<()> {
        self.frames.wait_all()?;
        self.context.wait_idle()?;

        let pipeline = PipelineStateObject::build(
            self.context.device(),
            configuration,
            &self.shader_stages,
            self.swapchain.format(),
        )?;
        let descriptors = FrameDescriptorSets::new(
            self.context.device(),
            pipeline.configuration(),
            pipeline.set_layouts(),
            self.frames.frames_in_flight(),
        )?;
        descriptors.write_frame_resources(
            self.context.device(),
            pipeline.configuration(),
            &self.uniforms,
            &self.texture,
        )?;

        self.swapchain.set_render_pass(&self.context, pipeline.render_pass().handle())?;
        self.descriptors = descriptors;
        self.pipeline = pipeline;
        Ok(())
    }

    /// Frames submitted since creation
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Index of the current frame slot
    pub fn current_frame(&self) -> usize {
        self.frames.current_frame()
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.frames_in_flight()
    }

    /// Frame slot state machine
    pub fn frame_tracker(&self) -> &FrameSlotTracker {
        self.frames.tracker()
    }

    /// Current swapchain extent
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Current swapchain colour format
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    /// Swapchain and its framebuffers
    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// Number of swapchain recreations
    pub fn swapchain_generation(&self) -> u64 {
        self.swapchain.generation()
    }

    /// The active pipeline
    pub fn pipeline(&self) -> &PipelineStateObject {
        &self.pipeline
    }

    /// Device, queues and command pools
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Block until the device has finished all work
    pub fn wait_idle(&mut self) -> VulkanResult<()> {
        self.frames.wait_all()?;
        self.context.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("Device did not go idle during teardown: {e}");
        }
        log::debug!("Renderer shut down after {} frames", self.frames_rendered);
    }
}

/// Surface format the swapchain will be created with
fn preferred_color_format(context: &DeviceContext) -> VulkanResult<vk::Format> {
    let support = SwapchainSupport::query(
        context.surface_loader(),
        context.physical_device().device,
        context.surface(),
    )?;
    choose_surface_format(&support.formats)
        .map(|sf| sf.format)
        .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))
}

fn validate_mesh(vertices: &[Vertex], indices: &[u16]) -> VulkanResult<()> {
    if vertices.is_empty() || indices.is_empty() {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "Mesh needs vertices and indices, got {} and {}",
                vertices.len(),
                indices.len()
            ),
        });
    }
    if let Some(&index) = indices.iter().find(|&&i| usize::from(i) >= vertices.len()) {
        return Err(VulkanError::InvalidOperation {
            reason: format!("Index {index} out of range for {} vertices", vertices.len()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_mesh_is_valid() {
        assert!(validate_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES).is_ok());
    }

    #[test]
    fn test_mesh_rejects_out_of_range_index() {
        let result = validate_mesh(&Vertex::unit_quad(), &[0, 1, 4]);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_mesh_rejects_empty_payload() {
        assert!(validate_mesh(&[], &[0]).is_err());
        assert!(validate_mesh(&Vertex::unit_quad(), &[]).is_err());
    }

    #[test]
    fn test_frame_status_rendered() {
        assert!(FrameStatus::Rendered.is_rendered());
        assert!(FrameStatus::RenderedAndRecreated.is_rendered());
        assert!(!FrameStatus::Dropped.is_rendered());
    }
}

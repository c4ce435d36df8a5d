//! Per-frame command recording

use ash::{vk, Device};

use super::commands::CommandRecorder;
use super::error::VulkanResult;

/// Framebuffer a frame renders into
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    /// Render pass compatible with the framebuffer
    pub render_pass: vk::RenderPass,
    /// Framebuffer of the acquired swapchain image
    pub framebuffer: vk::Framebuffer,
    /// Current swapchain extent
    pub extent: vk::Extent2D,
}

/// Everything bound for the frame's single indexed draw
#[derive(Debug, Clone, Copy)]
pub struct DrawState<'a> {
    /// Graphics pipeline
    pub pipeline: vk::Pipeline,
    /// Layout the descriptor sets are bound against
    pub layout: vk::PipelineLayout,
    /// Vertex buffers bound from binding 0
    pub vertex_buffers: &'a [vk::Buffer],
    /// 16-bit index buffer
    pub index_buffer: vk::Buffer,
    /// Indices to draw
    pub index_count: u32,
    /// Descriptor sets of the current frame slot
    pub descriptor_sets: &'a [vk::DescriptorSet],
}

/// Viewport covering `extent` with the standard depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Record one frame into `command_buffer`
///
/// The buffer must be reset and not pending. An empty index count records
/// only the clear.
pub fn record_frame(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    target: &RenderTarget,
    draw: &DrawState<'_>,
    clear_color: [f32; 4],
) -> VulkanResult<()> {
    let mut recorder = CommandRecorder::new(command_buffer, device.clone());
    recorder.begin()?;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue { float32: clear_color },
    }];

    {
        let mut pass = recorder.begin_render_pass(
            target.render_pass,
            target.framebuffer,
            full_scissor(target.extent),
            &clear_values,
        )?;

        if draw.index_count > 0 {
            pass.cmd_bind_pipeline(draw.pipeline);
            let offsets = vec![0; draw.vertex_buffers.len()];
            pass.cmd_bind_vertex_buffers(0, draw.vertex_buffers, &offsets);
            pass.cmd_bind_index_buffer(draw.index_buffer, 0, vk::IndexType::UINT16);
            pass.set_viewport(&full_viewport(target.extent));
            pass.set_scissor(&full_scissor(target.extent));
            if !draw.descriptor_sets.is_empty() {
                pass.cmd_bind_descriptor_sets(draw.layout, draw.descriptor_sets);
            }
            pass.cmd_draw_indexed(draw.index_count, 1, 0, 0, 0);
        }
    }

    recorder.end()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_relative_eq!(viewport.width, 800.0);
        assert_relative_eq!(viewport.height, 600.0);
        assert_relative_eq!(viewport.max_depth, 1.0);
        assert_relative_eq!(viewport.x, 0.0);
    }

    #[test]
    fn test_scissor_covers_extent() {
        let scissor = full_scissor(vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.extent.width, 1024);
        assert_eq!(scissor.extent.height, 768);
    }
}

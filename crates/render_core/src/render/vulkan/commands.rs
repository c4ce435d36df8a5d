//! Command buffer management
//!
//! Type-safe command buffer recording with RAII scoping for render passes and
//! one-shot submissions.

use ash::{vk, Device};

use super::error::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            command_pool,
            queue_family_index,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Return command buffers to the pool
    ///
    /// The buffers must not be pending execution.
    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device.free_command_buffers(self.command_pool, command_buffers);
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Queue family the pool's buffers must be submitted to
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Device the pool was created on
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Type-safe command buffer recorder
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Create a new command recorder
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Begin command recording for a single submission
    pub fn begin(&mut self) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            });
        }

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| VulkanError::RecordingFailed(format!("vkBeginCommandBuffer: {e:?}")))?;
        }

        self.recording = true;
        Ok(self)
    }

    /// Reset the buffer so it can be recorded again
    pub fn reset(&mut self) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot reset a command buffer while recording".to_string(),
            });
        }

        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| VulkanError::RecordingFailed(format!("vkResetCommandBuffer: {e:?}")))
        }
    }

    /// Begin render pass
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        self.ensure_recording()?;

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }

        Ok(ActiveRenderPass::new(self))
    }

    /// End command recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        self.ensure_recording()?;

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| VulkanError::RecordingFailed(format!("vkEndCommandBuffer: {e:?}")))?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Record a pipeline barrier with image memory barriers only
    pub fn cmd_image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        }
    }

    /// Copy between buffers
    pub fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, regions);
        }
    }

    /// Copy a buffer into an image in `TRANSFER_DST_OPTIMAL` layout
    pub fn cmd_copy_buffer_to_image(&mut self, src: vk::Buffer, dst: vk::Image, regions: &[vk::BufferImageCopy]) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    /// Raw command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn ensure_recording(&self) -> VulkanResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            })
        }
    }
}

/// Active render pass; ends the pass when dropped
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl<'a> ActiveRenderPass<'a> {
    fn new(recorder: &'a mut CommandRecorder) -> Self {
        Self { recorder }
    }

    /// Set viewport
    pub fn set_viewport(&mut self, viewport: &vk::Viewport) {
        unsafe {
            self.recorder
                .device
                .cmd_set_viewport(self.recorder.command_buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Set scissor
    pub fn set_scissor(&mut self, scissor: &vk::Rect2D) {
        unsafe {
            self.recorder
                .device
                .cmd_set_scissor(self.recorder.command_buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Bind graphics pipeline
    pub fn cmd_bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.recorder.device.cmd_bind_pipeline(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Bind vertex buffers
    pub fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_vertex_buffers(self.recorder.command_buffer, first_binding, buffers, offsets);
        }
    }

    /// Bind index buffer
    pub fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_index_buffer(self.recorder.command_buffer, buffer, offset, index_type);
        }
    }

    /// Bind descriptor sets starting at set 0
    pub fn cmd_bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, descriptor_sets: &[vk::DescriptorSet]) {
        unsafe {
            self.recorder.device.cmd_bind_descriptor_sets(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                descriptor_sets,
                &[],
            );
        }
    }

    /// Draw indexed
    pub fn cmd_draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.recorder.device.cmd_draw_indexed(
                self.recorder.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}

/// Single-use command buffer submitted synchronously
///
/// The buffer is freed on every exit path. Once submitted it is only freed
/// after the queue has gone idle, so nothing recorded into it can still
/// reference a resource the caller destroys afterwards.
pub struct ScopedCommandBuffer<'a> {
    pool: &'a CommandPool,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    in_flight: bool,
}

impl<'a> ScopedCommandBuffer<'a> {
    /// Record with `record`, submit to `queue` and block until it is idle
    ///
    /// `queue` must belong to the pool's queue family.
    pub fn run<F>(pool: &'a CommandPool, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let command_buffer = pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::RecordingFailed("Command pool returned no buffers".to_string()))?;

        let mut scoped = Self {
            pool,
            queue,
            command_buffer,
            in_flight: false,
        };

        let mut recorder = CommandRecorder::new(command_buffer, pool.device().clone());
        recorder.begin()?;
        record(&mut recorder)?;
        let command_buffer = recorder.end()?;

        scoped.submit_and_wait(command_buffer)
    }

    fn submit_and_wait(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let device = self.pool.device();
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            device
                .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.in_flight = true;

            device.queue_wait_idle(self.queue).map_err(VulkanError::Api)?;
        }
        self.in_flight = false;
        Ok(())
    }
}

impl Drop for ScopedCommandBuffer<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            unsafe {
                let _ = self.pool.device().device_wait_idle();
            }
        }
        self.pool.free_command_buffers(&[self.command_buffer]);
    }
}

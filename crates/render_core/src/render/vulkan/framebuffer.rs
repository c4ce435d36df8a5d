//! Swapchain framebuffers

use ash::{vk, Device};

use super::error::{VulkanError, VulkanResult};

/// Framebuffer over one swapchain image view
///
/// Must be dropped before the view it wraps; [`super::SwapchainManager`]
/// declares its framebuffers ahead of the swapchain for that reason.
pub struct Framebuffer {
    device: Device,
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Single-layer framebuffer with `color_view` as attachment 0 of `render_pass`
    pub fn for_color_view(
        device: Device,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let attachments = [color_view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe { device.create_framebuffer(&create_info, None) }.map_err(|e| {
            VulkanError::InitializationFailed(format!(
                "Framebuffer {}x{}: {e:?}",
                extent.width, extent.height
            ))
        })?;

        Ok(Self { device, handle, extent })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    /// Size the framebuffer was created with
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.handle, None) };
    }
}

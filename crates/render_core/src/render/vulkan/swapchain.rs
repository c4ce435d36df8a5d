//! Vulkan swapchain management
//!
//! Handles swapchain creation, recreation, and framebuffer ownership. The
//! choice functions are kept free of API calls so they can be tested
//! directly.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device};

use super::context::DeviceContext;
use super::error::{VulkanError, VulkanResult};
use super::framebuffer::Framebuffer;
use super::memory::SharingPolicy;
use super::window::{wait_for_drawable_size, SurfaceWindow};

/// What a surface supports on a given physical device
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / colour space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query surface support for `physical_device`
    pub fn query(
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }

    /// A device is usable only with at least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise the first reported format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Prefer mailbox, otherwise FIFO (always available)
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface extent, or the framebuffer size clamped to the surface limits
/// when the surface leaves the extent to the application
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer_size.0.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_size.1.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more image than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain sized for `framebuffer_size`
    ///
    /// `old_swapchain` may be a retired swapchain being replaced; the caller
    /// still owns and destroys it.
    pub fn new(
        context: &DeviceContext,
        framebuffer_size: (u32, u32),
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let support = SwapchainSupport::query(
            context.surface_loader(),
            context.physical_device().device,
            context.surface(),
        )?;

        let format = choose_surface_format(&support.formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, framebuffer_size);
        let image_count = choose_image_count(&support.capabilities);
        let sharing = SharingPolicy::for_families(&context.families());

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing.mode())
            .queue_family_indices(sharing.family_indices())
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain_loader = context.swapchain_loader().clone();
        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("vkCreateSwapchainKHR: {e:?}")))?
        };

        let device = context.device().clone();
        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut created = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::with_capacity(images.len()),
            format,
            present_mode,
            extent,
        };
        for &image in &images {
            let view = create_color_view(&created.device, image, format.format)?;
            created.image_views.push(view);
        }
        created.images = images;

        log::info!(
            "Created swapchain: {}x{}, {:?}/{:?}, {:?}, {} images, {:?} sharing",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            created.images.len(),
            sharing.mode()
        );

        Ok(created)
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get the chosen present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Presentable image `image_index`
    pub fn image(&self, image_index: u32) -> Option<vk::Image> {
        self.images.get(image_index as usize).copied()
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Acquire the next image, signaling `signal` when it is ready
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation once `wait` is signaled
    ///
    /// Returns whether the swapchain is suboptimal.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_color_view(device: &Device, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.map_err(VulkanError::Api)
}

/// Swapchain together with one framebuffer per swapchain image
///
/// Framebuffers are declared first so they are destroyed before the image
/// views they reference.
pub struct SwapchainManager {
    framebuffers: Vec<Framebuffer>,
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    generation: u64,
}

impl SwapchainManager {
    /// Create the swapchain and its framebuffers for `render_pass`
    pub fn new<W: SurfaceWindow + ?Sized>(
        context: &DeviceContext,
        window: &mut W,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<Self> {
        let framebuffer_size = wait_for_drawable_size(window);
        let swapchain = Swapchain::new(context, framebuffer_size, vk::SwapchainKHR::null())?;
        let framebuffers = create_framebuffers(context, &swapchain, render_pass)?;

        Ok(Self {
            framebuffers,
            swapchain,
            render_pass,
            generation: 0,
        })
    }

    /// Rebuild the swapchain and image views, leaving no framebuffers
    ///
    /// Blocks while the window is minimized, then waits for the device to go
    /// idle before anything is destroyed. [`Self::set_render_pass`] must be
    /// called before the next frame is recorded.
    pub fn recreate_images<W: SurfaceWindow + ?Sized>(
        &mut self,
        context: &DeviceContext,
        window: &mut W,
    ) -> VulkanResult<()> {
        let framebuffer_size = wait_for_drawable_size(window);
        context.wait_idle()?;

        self.framebuffers.clear();
        let replacement = Swapchain::new(context, framebuffer_size, self.swapchain.handle())?;
        self.swapchain = replacement;
        self.generation += 1;

        log::debug!("Swapchain recreated (generation {})", self.generation);
        Ok(())
    }

    /// Point future framebuffers at a different render pass and rebuild them
    pub fn set_render_pass(&mut self, context: &DeviceContext, render_pass: vk::RenderPass) -> VulkanResult<()> {
        self.framebuffers.clear();
        self.render_pass = render_pass;
        self.framebuffers = create_framebuffers(context, &self.swapchain, render_pass)?;
        Ok(())
    }

    /// The current swapchain
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Framebuffer for swapchain image `image_index`
    pub fn framebuffer(&self, image_index: u32) -> Option<&Framebuffer> {
        self.framebuffers.get(image_index as usize)
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Current colour format
    pub fn format(&self) -> vk::Format {
        self.swapchain.format().format
    }

    /// Render pass the framebuffers were built for
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of framebuffers currently built
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of recreations since creation
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn create_framebuffers(
    context: &DeviceContext,
    swapchain: &Swapchain,
    render_pass: vk::RenderPass,
) -> VulkanResult<Vec<Framebuffer>> {
    swapchain
        .image_views()
        .iter()
        .map(|&view| Framebuffer::for_color_view(context.device().clone(), render_pass, view, swapchain.extent()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_prefers_bgra_srgb_format() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_choice() {
        let with_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&with_mailbox), vk::PresentModeKHR::MAILBOX);

        let without = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&without), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_uses_surface_extent_when_defined() {
        let caps = capabilities((800, 600), 2, 3);
        let extent = choose_extent(&caps, (1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_framebuffer_size() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 3);

        let extent = choose_extent(&caps, (800, 600));
        assert_eq!((extent.width, extent.height), (800, 600));

        let extent = choose_extent(&caps, (10_000, 10));
        assert_eq!((extent.width, extent.height), (4096, 64));
    }

    #[test]
    fn test_image_count_bounds() {
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 3)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 3, 3)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 0)), 3);
    }

    #[test]
    fn test_support_adequacy() {
        let mut support = SwapchainSupport {
            capabilities: capabilities((1, 1), 2, 3),
            formats: vec![surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: Vec::new(),
        };
        assert!(!support.is_adequate());
        support.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(support.is_adequate());
    }
}

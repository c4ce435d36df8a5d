//! Sampled textures
//!
//! Pixels are staged into a host buffer, copied on the transfer queue, and
//! the image is handed to the graphics queue in `ShaderReadOnly` layout.

use std::path::Path;

use ash::{vk, Device};

use super::buffer::{BufferKind, GpuBuffer};
use super::context::DeviceContext;
use super::error::{VulkanError, VulkanResult};
use super::image::{ImageLayoutState, ImageResource};

/// Format used for all decoded color textures
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampled image with its sampler
pub struct Texture {
    sampler: vk::Sampler,
    image: ImageResource,
    device: Device,
}

impl Texture {
    /// Upload tightly packed RGBA8 `pixels` of `width` x `height`
    pub fn from_rgba8(context: &DeviceContext, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Texture of {width}x{height} needs {expected} bytes, got {}",
                    pixels.len()
                ),
            });
        }

        let extent = vk::Extent2D { width, height };
        let mut image = ImageResource::new_sampled(context, extent, TEXTURE_FORMAT)?;

        let mut staging = GpuBuffer::new(context, BufferKind::Staging, pixels.len() as vk::DeviceSize)?;
        staging.write_bytes(pixels)?;

        image.transition_layout(context, ImageLayoutState::TransferDst)?;
        image.copy_from_buffer(context, &staging)?;
        image.transition_layout(context, ImageLayoutState::ShaderReadOnly)?;

        let sampler = create_sampler(context)?;
        log::debug!("Uploaded {width}x{height} texture");

        Ok(Self {
            sampler,
            image,
            device: context.device().clone(),
        })
    }

    /// Decode an image file and upload it as RGBA8
    pub fn from_file(context: &DeviceContext, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let decoded = ::image::open(path)
            .map_err(|e| VulkanError::AssetLoad(format!("{}: {e}", path.display())))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();

        log::info!("Loading texture {} ({width}x{height})", path.display());
        Self::from_rgba8(context, width, height, decoded.as_raw())
    }

    /// 1x1 texture of a single color
    pub fn solid_color(context: &DeviceContext, rgba: [u8; 4]) -> VulkanResult<Self> {
        Self::from_rgba8(context, 1, 1, &rgba)
    }

    /// 1x1 opaque white, used when nothing else is bound
    pub fn default_white(context: &DeviceContext) -> VulkanResult<Self> {
        Self::solid_color(context, [255, 255, 255, 255])
    }

    /// Get the image view for descriptor set binding
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Get the sampler for descriptor set binding
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Backing image
    pub fn image(&self) -> &ImageResource {
        &self.image
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

fn create_sampler(context: &DeviceContext) -> VulkanResult<vk::Sampler> {
    let anisotropy = context.sampler_anisotropy();
    let max_anisotropy = if anisotropy {
        context.physical_device().properties.limits.max_sampler_anisotropy
    } else {
        1.0
    };

    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(max_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

    unsafe { context.device().create_sampler(&sampler_info, None) }
        .map_err(|e| VulkanError::allocation(0, e))
}

//! Device-local images with tracked layout
//!
//! Only three transitions are legal:
//!
//! | from                | to                      | queue    |
//! |---------------------|-------------------------|----------|
//! | `Undefined`         | `TransferDst`           | transfer |
//! | `TransferDst`       | `ShaderReadOnly`        | transfer, then graphics |
//! | `Undefined`         | `DepthStencilAttachment`| graphics |
//!
//! Images are created with exclusive sharing. When the transfer and graphics
//! families differ, `TransferDst -> ShaderReadOnly` is a release barrier on
//! the transfer queue paired with an acquire barrier on the graphics queue.

use ash::{vk, Device};

use super::buffer::GpuBuffer;
use super::context::{DeviceContext, QueueRole};
use super::device::QueueFamilies;
use super::error::{VulkanError, VulkanResult};
use super::memory::{self, MemoryVisibility};

/// Layout an image is known to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayoutState {
    /// Contents undefined; initial state
    Undefined,
    /// Ready to be written by transfer commands
    TransferDst,
    /// Ready to be sampled from fragment shaders
    ShaderReadOnly,
    /// Ready for depth/stencil testing
    DepthStencilAttachment,
}

impl ImageLayoutState {
    /// Matching Vulkan layout
    pub fn vk_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

/// Family hand-off that accompanies a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOwnershipTransfer {
    /// Family that records the release barrier
    pub release_family: u32,
    /// Family that records the acquire barrier
    pub acquire_family: u32,
}

/// Barrier parameters for one legal layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Layout before the barrier
    pub from: ImageLayoutState,
    /// Layout after the barrier
    pub to: ImageLayoutState,
    /// Queue that finishes the transition and owns the image afterwards
    pub queue: QueueRole,
    /// Stage that must complete first
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits
    pub dst_stage: vk::PipelineStageFlags,
    /// Writes made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
    /// Aspects covered by the barrier
    pub aspect: vk::ImageAspectFlags,
    /// Present when the image changes queue family
    pub ownership: Option<QueueOwnershipTransfer>,
}

impl LayoutTransition {
    /// Plan `from -> to` for an image of `format`
    ///
    /// Fails with [`VulkanError::UnsupportedLayoutTransition`] for any pair
    /// outside the legal set.
    pub fn plan(
        from: ImageLayoutState,
        to: ImageLayoutState,
        families: &QueueFamilies,
        format: vk::Format,
    ) -> VulkanResult<Self> {
        use ImageLayoutState::{DepthStencilAttachment, ShaderReadOnly, TransferDst, Undefined};

        let transition = match (from, to) {
            (Undefined, TransferDst) => Self {
                from,
                to,
                queue: QueueRole::Transfer,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                aspect: vk::ImageAspectFlags::COLOR,
                ownership: None,
            },
            (TransferDst, ShaderReadOnly) => Self {
                from,
                to,
                queue: QueueRole::Graphics,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                aspect: vk::ImageAspectFlags::COLOR,
                ownership: families.has_dedicated_transfer().then_some(QueueOwnershipTransfer {
                    release_family: families.transfer,
                    acquire_family: families.graphics,
                }),
            },
            (Undefined, DepthStencilAttachment) => Self {
                from,
                to,
                queue: QueueRole::Graphics,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                aspect: depth_aspect(format),
                ownership: None,
            },
            _ => return Err(VulkanError::UnsupportedLayoutTransition { from, to }),
        };

        Ok(transition)
    }

    /// Single barrier used when no ownership transfer is needed
    pub fn barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier {
        self.image_barrier(image, self.src_access, self.dst_access)
    }

    /// Release half of an ownership transfer, recorded on the source family
    pub fn release_barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier {
        self.image_barrier(image, self.src_access, vk::AccessFlags::empty())
    }

    /// Acquire half of an ownership transfer, recorded on the destination family
    pub fn acquire_barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier {
        self.image_barrier(image, vk::AccessFlags::empty(), self.dst_access)
    }

    fn image_barrier(
        &self,
        image: vk::Image,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> vk::ImageMemoryBarrier {
        let (src_family, dst_family) = self.ownership.map_or(
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
            |transfer| (transfer.release_family, transfer.acquire_family),
        );

        vk::ImageMemoryBarrier::builder()
            .old_layout(self.from.vk_layout())
            .new_layout(self.to.vk_layout())
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(image)
            .subresource_range(subresource_range(self.aspect))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build()
    }
}

/// Whether `format` carries a stencil component
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(format, vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT)
}

fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features allow depth attachment
pub fn choose_depth_format<F>(candidates: &[vk::Format], mut properties: F) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    candidates.iter().copied().find(|&format| {
        properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Image, memory and view with a tracked layout
pub struct ImageResource {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    layout: ImageLayoutState,
    owner_family: Option<u32>,
}

impl ImageResource {
    /// Create a 2D device-local image in `Undefined` layout
    pub fn new(
        context: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Image requested with extent {}x{}", extent.width, extent.height),
            });
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let device = context.device().clone();
        let requested = u64::from(extent.width) * u64::from(extent.height);
        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| VulkanError::allocation(requested, e))?;

        // Null handles are valid to destroy, so Drop covers partial construction.
        let mut created = Self {
            device,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
            extent,
            aspect,
            layout: ImageLayoutState::Undefined,
            owner_family: None,
        };

        let requirements = unsafe { created.device.get_image_memory_requirements(image) };
        created.memory = memory::allocate(
            &created.device,
            context.memory_properties(),
            requirements,
            MemoryVisibility::DeviceLocal,
        )?;
        unsafe {
            created
                .device
                .bind_image_memory(image, created.memory, 0)
                .map_err(|e| VulkanError::allocation(requirements.size, e))?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect));
        created.view = unsafe { created.device.create_image_view(&view_info, None) }.map_err(VulkanError::Api)?;

        Ok(created)
    }

    /// Sampled color image filled by transfer commands
    pub fn new_sampled(context: &DeviceContext, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<Self> {
        Self::new(
            context,
            extent,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )
    }

    /// Depth attachment already transitioned to `DepthStencilAttachment`
    pub fn new_depth(context: &DeviceContext, extent: vk::Extent2D) -> VulkanResult<Self> {
        let format = Self::find_depth_format(context)?;
        let mut depth = Self::new(
            context,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        depth.transition_layout(context, ImageLayoutState::DepthStencilAttachment)?;
        Ok(depth)
    }

    /// Best supported depth format on the context's device
    pub fn find_depth_format(context: &DeviceContext) -> VulkanResult<vk::Format> {
        let physical_device = context.physical_device().device;
        choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| unsafe {
            context
                .instance()
                .get_physical_device_format_properties(physical_device, format)
        })
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth format".to_string()))
    }

    /// Transition to `target`, submitting barriers on the queue(s) the
    /// transition requires and waiting for them
    ///
    /// The recorded layout is only updated once the barriers have executed.
    pub fn transition_layout(&mut self, context: &DeviceContext, target: ImageLayoutState) -> VulkanResult<()> {
        let transition = LayoutTransition::plan(self.layout, target, &context.families(), self.format)?;
        let image = self.image;

        if let Some(ownership) = transition.ownership {
            context.submit_scoped(QueueRole::Transfer, |recorder| {
                recorder.cmd_image_barrier(
                    transition.src_stage,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    &[transition.release_barrier(image)],
                );
                Ok(())
            })?;
            context.submit_scoped(QueueRole::Graphics, |recorder| {
                recorder.cmd_image_barrier(
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    transition.dst_stage,
                    &[transition.acquire_barrier(image)],
                );
                Ok(())
            })?;
            log::trace!(
                "Image ownership moved from family {} to {}",
                ownership.release_family,
                ownership.acquire_family
            );
        } else {
            context.submit_scoped(transition.queue, |recorder| {
                recorder.cmd_image_barrier(transition.src_stage, transition.dst_stage, &[transition.barrier(image)]);
                Ok(())
            })?;
        }

        self.layout = target;
        self.owner_family = Some(context.family(transition.queue));
        Ok(())
    }

    /// Copy tightly packed texels from `source` into the whole image
    ///
    /// The image must be in `TransferDst` layout.
    pub fn copy_from_buffer(&self, context: &DeviceContext, source: &GpuBuffer) -> VulkanResult<()> {
        if self.layout != ImageLayoutState::TransferDst {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Buffer copy into image in {:?} layout", self.layout),
            });
        }

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .build();

        let image = self.image;
        context.submit_scoped(QueueRole::Transfer, |recorder| {
            recorder.cmd_copy_buffer_to_image(source.handle(), image, &[region]);
            Ok(())
        })
    }

    /// Current layout
    pub fn layout(&self) -> ImageLayoutState {
        self.layout
    }

    /// Family that last transitioned the image, if any
    pub fn owner_family(&self) -> Option<u32> {
        self.owner_family
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for ImageResource {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARED: QueueFamilies = QueueFamilies {
        graphics: 0,
        transfer: 0,
        present: 0,
    };

    const DEDICATED: QueueFamilies = QueueFamilies {
        graphics: 0,
        transfer: 1,
        present: 0,
    };

    const ALL_LAYOUTS: [ImageLayoutState; 4] = [
        ImageLayoutState::Undefined,
        ImageLayoutState::TransferDst,
        ImageLayoutState::ShaderReadOnly,
        ImageLayoutState::DepthStencilAttachment,
    ];

    #[test]
    fn test_only_three_transitions_are_legal() {
        let legal = [
            (ImageLayoutState::Undefined, ImageLayoutState::TransferDst),
            (ImageLayoutState::TransferDst, ImageLayoutState::ShaderReadOnly),
            (ImageLayoutState::Undefined, ImageLayoutState::DepthStencilAttachment),
        ];

        for from in ALL_LAYOUTS {
            for to in ALL_LAYOUTS {
                let result = LayoutTransition::plan(from, to, &SHARED, vk::Format::R8G8B8A8_SRGB);
                if legal.contains(&(from, to)) {
                    assert!(result.is_ok(), "{from:?} -> {to:?} should be legal");
                } else {
                    assert!(
                        matches!(result, Err(VulkanError::UnsupportedLayoutTransition { from: f, to: t }) if f == from && t == to),
                        "{from:?} -> {to:?} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_upload_transition_runs_on_transfer_queue() {
        let t = LayoutTransition::plan(
            ImageLayoutState::Undefined,
            ImageLayoutState::TransferDst,
            &DEDICATED,
            vk::Format::R8G8B8A8_SRGB,
        )
        .unwrap();
        assert_eq!(t.queue, QueueRole::Transfer);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert!(t.ownership.is_none());

        let barrier = t.barrier(vk::Image::null());
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn test_shader_read_hands_ownership_to_graphics() {
        let t = LayoutTransition::plan(
            ImageLayoutState::TransferDst,
            ImageLayoutState::ShaderReadOnly,
            &DEDICATED,
            vk::Format::R8G8B8A8_SRGB,
        )
        .unwrap();
        assert_eq!(
            t.ownership,
            Some(QueueOwnershipTransfer {
                release_family: 1,
                acquire_family: 0,
            })
        );

        let release = t.release_barrier(vk::Image::null());
        let acquire = t.acquire_barrier(vk::Image::null());
        for barrier in [&release, &acquire] {
            assert_eq!(barrier.src_queue_family_index, 1);
            assert_eq!(barrier.dst_queue_family_index, 0);
            assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
        assert_eq!(release.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(release.dst_access_mask, vk::AccessFlags::empty());
        assert_eq!(acquire.dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_shared_family_needs_no_ownership_transfer() {
        let t = LayoutTransition::plan(
            ImageLayoutState::TransferDst,
            ImageLayoutState::ShaderReadOnly,
            &SHARED,
            vk::Format::R8G8B8A8_SRGB,
        )
        .unwrap();
        assert!(t.ownership.is_none());
        assert_eq!(t.queue, QueueRole::Graphics);
        assert_eq!(t.barrier(vk::Image::null()).dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_depth_aspect_includes_stencil_when_present() {
        let plan = |format| {
            LayoutTransition::plan(
                ImageLayoutState::Undefined,
                ImageLayoutState::DepthStencilAttachment,
                &SHARED,
                format,
            )
            .unwrap()
        };

        let depth_only = plan(vk::Format::D32_SFLOAT);
        assert_eq!(depth_only.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth_only.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert_eq!(depth_only.queue, QueueRole::Graphics);

        let with_stencil = plan(vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(
            with_stencil.aspect,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_depth_format_falls_through_unsupported() {
        let chosen = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        });
        assert_eq!(chosen, Some(vk::Format::D24_UNORM_S8_UINT));
        assert_eq!(
            choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| vk::FormatProperties::default()),
            None
        );
    }
}

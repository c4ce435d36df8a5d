//! Descriptor set layouts, pools and per-frame sets
//!
//! Layouts come from the pipeline configuration's declarations. The pool is
//! sized for one copy of every set per frame slot, so each slot binds its own
//! uniform buffer while sharing the texture.

use std::collections::BTreeMap;

use ash::{vk, Device};
use bytemuck::Pod;

use super::buffer::UniformBuffers;
use super::error::{VulkanError, VulkanResult};
use super::pipeline_config::PipelineConfiguration;
use super::texture::Texture;

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Create a layout from explicit bindings
    pub fn new(device: Device, bindings: Vec<vk::DescriptorSetLayoutBinding>) -> VulkanResult<Self> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| VulkanError::PipelineCreationFailed(format!("Descriptor set layout: {e:?}")))?;

        Ok(Self {
            layout,
            device,
            bindings,
        })
    }

    /// One layout per set declared by `config`
    pub fn from_configuration(device: &Device, config: &PipelineConfiguration) -> VulkanResult<Vec<Self>> {
        config
            .set_layout_bindings()?
            .into_iter()
            .map(|bindings| Self::new(device.clone(), bindings))
            .collect()
    }

    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool sizes covering `frames` copies of every set in `set_bindings`
///
/// Fails if a total does not fit in a `u32`.
pub fn pool_sizes(
    set_bindings: &[Vec<vk::DescriptorSetLayoutBinding>],
    frames: u32,
) -> VulkanResult<Vec<vk::DescriptorPoolSize>> {
    let overflow = || VulkanError::PipelineCreationFailed(format!("Descriptor pool for {frames} frames overflows"));

    let mut totals: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in set_bindings.iter().flatten() {
        let total = totals.entry(binding.descriptor_type.as_raw()).or_default();
        *total = total.checked_add(binding.descriptor_count).ok_or_else(overflow)?;
    }

    totals
        .into_iter()
        .map(|(ty, count)| {
            Ok(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from_raw(ty),
                descriptor_count: count.checked_mul(frames).ok_or_else(overflow)?,
            })
        })
        .collect()
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
    max_sets: u32,
}

impl DescriptorPool {
    /// Create a pool holding `frames` copies of every set `config` declares
    pub fn new(device: Device, config: &PipelineConfiguration, frames: u32) -> VulkanResult<Self> {
        let set_bindings = config.set_layout_bindings()?;
        let sizes = pool_sizes(&set_bindings, frames)?;
        let max_sets = u32::try_from(set_bindings.len())
            .ok()
            .and_then(|sets| sets.checked_mul(frames))
            .ok_or_else(|| VulkanError::PipelineCreationFailed(format!("Descriptor sets for {frames} frames overflow")))?
            .max(1);

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| VulkanError::allocation(u64::from(max_sets), e))?;

        Ok(Self { pool, device, max_sets })
    }

    /// Allocate descriptor sets from this pool
    pub fn allocate_descriptor_sets(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| VulkanError::allocation(layouts.len() as u64, e))
    }

    /// Maximum number of sets
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingWrite {
    Buffer {
        set: vk::DescriptorSet,
        binding: u32,
        infos: Vec<vk::DescriptorBufferInfo>,
    },
    Image {
        set: vk::DescriptorSet,
        binding: u32,
        infos: Vec<vk::DescriptorImageInfo>,
    },
}

impl PendingWrite {
    fn descriptor_count(&self) -> usize {
        match self {
            Self::Buffer { infos, .. } => infos.len(),
            Self::Image { infos, .. } => infos.len(),
        }
    }
}

/// Collects descriptor writes and applies them in one update call
#[derive(Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `binding` of `set` at a uniform buffer range
    pub fn write_buffer(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Self {
        self.write_buffer_array(set, binding, buffer, range, 1)
    }

    /// Point all `count` elements of array `binding` at the same uniform buffer range
    pub fn write_buffer_array(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
        count: u32,
    ) -> Self {
        let info = vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        };
        self.pending.push(PendingWrite::Buffer {
            set,
            binding,
            infos: vec![info; count as usize],
        });
        self
    }

    /// Point `binding` of `set` at a sampled image
    pub fn write_image(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        self.write_image_array(set, binding, image_view, sampler, 1)
    }

    /// Point all `count` elements of array `binding` at the same sampled image
    pub fn write_image_array(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        count: u32,
    ) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        self.pending.push(PendingWrite::Image {
            set,
            binding,
            infos: vec![info; count as usize],
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Number of array elements the queued writes cover
    pub fn descriptor_count(&self) -> usize {
        self.pending.iter().map(PendingWrite::descriptor_count).sum()
    }

    /// Whether no writes are queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply all queued writes
    pub fn update(self, device: &Device) {
        // Infos are borrowed from `self.pending`, which does not move until the call returns.
        let writes: Vec<vk::WriteDescriptorSet> = self
            .pending
            .iter()
            .filter(|pending| pending.descriptor_count() > 0)
            .map(|pending| match pending {
                PendingWrite::Buffer { set, binding, infos } => vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(infos)
                    .build(),
                PendingWrite::Image { set, binding, infos } => vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(infos)
                    .build(),
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

/// Descriptor sets for every frame slot, allocated from their own pool
///
/// Configurations without declarations get empty set lists and no pool.
pub struct FrameDescriptorSets {
    sets: Vec<Vec<vk::DescriptorSet>>,
    pool: Option<DescriptorPool>,
}

impl FrameDescriptorSets {
    /// Allocate one copy of `layouts` per frame slot
    pub fn new(
        device: &Device,
        config: &PipelineConfiguration,
        layouts: &[DescriptorSetLayout],
        frames: usize,
    ) -> VulkanResult<Self> {
        if layouts.is_empty() {
            return Ok(Self {
                sets: vec![Vec::new(); frames],
                pool: None,
            });
        }

        let pool = DescriptorPool::new(device.clone(), config, frames as u32)?;
        let handles: Vec<vk::DescriptorSetLayout> = layouts.iter().map(DescriptorSetLayout::handle).collect();

        let sets = (0..frames)
            .map(|_| pool.allocate_descriptor_sets(&handles))
            .collect::<VulkanResult<Vec<_>>>()?;

        Ok(Self {
            sets,
            pool: Some(pool),
        })
    }

    /// Sets to bind for `slot`, in set-number order
    pub fn sets(&self, slot: usize) -> &[vk::DescriptorSet] {
        self.sets.get(slot).map_or(&[], Vec::as_slice)
    }

    /// Number of frame slots
    pub fn frames(&self) -> usize {
        self.sets.len()
    }

    /// Owning pool
    pub fn pool(&self) -> Option<&DescriptorPool> {
        self.pool.as_ref()
    }

    /// Write every declared binding for every slot
    ///
    /// Uniform buffer bindings get the slot's own buffer; sampler bindings
    /// all get `texture`. Every element of an array binding is written.
    pub fn write_frame_resources<T: Pod>(
        &self,
        device: &Device,
        config: &PipelineConfiguration,
        uniforms: &UniformBuffers<T>,
        texture: &Texture,
    ) -> VulkanResult<()> {
        let set_bindings = config.set_layout_bindings()?;
        let mut writer = DescriptorSetWriter::new();

        for (slot, sets) in self.sets.iter().enumerate() {
            for (&set, bindings) in sets.iter().zip(&set_bindings) {
                for layout_binding in bindings {
                    let (binding, count) = (layout_binding.binding, layout_binding.descriptor_count);
                    writer = match layout_binding.descriptor_type {
                        vk::DescriptorType::UNIFORM_BUFFER => {
                            let buffer = uniforms.handle(slot).ok_or_else(|| VulkanError::InvalidOperation {
                                reason: format!("No uniform buffer for frame slot {slot}"),
                            })?;
                            writer.write_buffer_array(set, binding, buffer, uniforms.range(), count)
                        }
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => {
                            writer.write_image_array(set, binding, texture.view(), texture.sampler(), count)
                        }
                        other => {
                            return Err(VulkanError::InvalidOperation {
                                reason: format!("No frame resource for descriptor type {other:?}"),
                            })
                        }
                    };
                }
            }
        }

        if !writer.is_empty() {
            writer.update(device);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::pipeline_config::{DescriptorDeclaration, ShaderStages};

    fn size_of(sizes: &[vk::DescriptorPoolSize], ty: vk::DescriptorType) -> Option<u32> {
        sizes.iter().find(|s| s.ty == ty).map(|s| s.descriptor_count)
    }

    #[test]
    fn test_pool_scales_with_frames() {
        let bindings = PipelineConfiguration::default().set_layout_bindings().unwrap();
        let sizes = pool_sizes(&bindings, 2).unwrap();
        assert_eq!(sizes.len(), 2);
        assert_eq!(size_of(&sizes, vk::DescriptorType::UNIFORM_BUFFER), Some(2));
        assert_eq!(size_of(&sizes, vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(2));
    }

    #[test]
    fn test_pool_counts_arrays() {
        let mut config = PipelineConfiguration::default();
        config.descriptors.push(DescriptorDeclaration {
            count: 4,
            ..DescriptorDeclaration::image_sampler(2, ShaderStages::FRAGMENT)
        });
        let sizes = pool_sizes(&config.set_layout_bindings().unwrap(), 3).unwrap();
        assert_eq!(size_of(&sizes, vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(15));
        assert_eq!(size_of(&sizes, vk::DescriptorType::UNIFORM_BUFFER), Some(3));
    }

    #[test]
    fn test_no_declarations_no_sizes() {
        let config = PipelineConfiguration {
            descriptors: Vec::new(),
            ..PipelineConfiguration::default()
        };
        assert!(pool_sizes(&config.set_layout_bindings().unwrap(), 2).unwrap().is_empty());
    }

    #[test]
    fn test_pool_size_overflow_is_an_error() {
        let binding = |binding, descriptor_count| vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            p_immutable_samplers: std::ptr::null(),
        };

        let half = vec![vec![binding(0, u32::MAX / 2), binding(1, 1)]];
        assert_eq!(
            size_of(&pool_sizes(&half, 1).unwrap(), vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            Some(u32::MAX / 2 + 1)
        );
        assert!(matches!(
            pool_sizes(&half, 3),
            Err(VulkanError::PipelineCreationFailed(_))
        ));

        let full = vec![vec![binding(0, u32::MAX)], vec![binding(0, 1)]];
        assert!(pool_sizes(&full, 1).is_err());
    }

    #[test]
    fn test_array_writes_cover_every_element() {
        let writer = DescriptorSetWriter::new()
            .write_buffer_array(vk::DescriptorSet::null(), 0, vk::Buffer::null(), 192, 3)
            .write_image_array(vk::DescriptorSet::null(), 1, vk::ImageView::null(), vk::Sampler::null(), 4)
            .write_image(vk::DescriptorSet::null(), 2, vk::ImageView::null(), vk::Sampler::null());
        assert_eq!(writer.len(), 3);
        assert_eq!(writer.descriptor_count(), 8);
    }

    #[test]
    fn test_writer_queues_writes() {
        let writer = DescriptorSetWriter::new()
            .write_buffer(vk::DescriptorSet::null(), 0, vk::Buffer::null(), 192)
            .write_image(vk::DescriptorSet::null(), 1, vk::ImageView::null(), vk::Sampler::null());
        assert_eq!(writer.len(), 2);
        assert!(DescriptorSetWriter::new().is_empty());
    }
}

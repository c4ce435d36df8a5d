//! Pipeline configuration value object
//!
//! Plain serializable settings describing one graphics pipeline. The pipeline
//! builder consumes it as-is; nothing here touches the device.

use std::collections::BTreeMap;
use std::mem;

use ash::vk;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::error::{VulkanError, VulkanResult};
use super::vertex::Vertex;
use crate::config::Config;

/// How vertices are assembled into primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    /// Every three indices form a triangle
    TriangleList,
    /// Every two indices form a line
    LineList,
}

impl PrimitiveTopology {
    /// Vulkan topology
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Self::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::LineList => vk::PrimitiveTopology::LINE_LIST,
        }
    }
}

/// Polygon rasterization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolygonMode {
    /// Solid rendering
    Fill,
    /// Edges only
    Wireframe,
}

impl PolygonMode {
    /// Vulkan polygon mode
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            Self::Fill => vk::PolygonMode::FILL,
            Self::Wireframe => vk::PolygonMode::LINE,
        }
    }
}

/// Face culling modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull back faces
    Back,
}

impl CullMode {
    /// Vulkan cull flags
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding order of front-facing triangles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontFace {
    /// Clockwise in framebuffer space
    Clockwise,
    /// Counter-clockwise in framebuffer space
    CounterClockwise,
}

impl FrontFace {
    /// Vulkan front face
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            Self::Clockwise => vk::FrontFace::CLOCKWISE,
            Self::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// Color blending applied to the single color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    /// Standard alpha blending
    Alpha,
    /// Source added to destination, alpha untouched
    AdditiveRgb,
}

impl BlendMode {
    /// Attachment blend state
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let (src, dst) = match self {
            Self::Alpha => (vk::BlendFactor::SRC_ALPHA, vk::BlendFactor::ONE_MINUS_SRC_ALPHA),
            Self::AdditiveRgb => (vk::BlendFactor::ONE, vk::BlendFactor::ONE),
        };

        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: src,
            dst_color_blend_factor: dst,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

/// Rate at which a vertex binding advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexInputRate {
    /// Once per vertex
    Vertex,
    /// Once per instance
    Instance,
}

impl VertexInputRate {
    /// Vulkan input rate
    pub fn to_vk(self) -> vk::VertexInputRate {
        match self {
            Self::Vertex => vk::VertexInputRate::VERTEX,
            Self::Instance => vk::VertexInputRate::INSTANCE,
        }
    }
}

/// Vertex attribute component layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeFormat {
    /// Three 32-bit floats
    RgbF32,
    /// Two 32-bit floats
    RgF32,
}

impl AttributeFormat {
    /// Vulkan format
    pub fn to_vk(self) -> vk::Format {
        match self {
            Self::RgbF32 => vk::Format::R32G32B32_SFLOAT,
            Self::RgF32 => vk::Format::R32G32_SFLOAT,
        }
    }

    /// Size in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::RgbF32 => 12,
            Self::RgF32 => 8,
        }
    }
}

bitflags! {
    /// Shader stages that access a descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
    }
}

impl ShaderStages {
    /// Vulkan stage flags
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        if self.contains(Self::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if self.contains(Self::FRAGMENT) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        flags
    }
}

/// Kind of resource a descriptor binding exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Uniform buffer
    UniformBuffer,
    /// Sampled image with its sampler
    CombinedImageSampler,
}

impl DescriptorKind {
    /// Vulkan descriptor type
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// Vertex buffer binding description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexBinding {
    /// Binding index
    pub binding: u32,
    /// Bytes between consecutive elements
    pub stride: u32,
    /// Advance rate
    pub input_rate: VertexInputRate,
}

/// Vertex attribute description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Binding the attribute reads from
    pub binding: u32,
    /// Component layout
    pub format: AttributeFormat,
    /// Byte offset within an element
    pub offset: u32,
}

/// Highest descriptor set count every Vulkan implementation must support
pub const MAX_DESCRIPTOR_SETS: u32 = 4;

/// Longest descriptor array a declaration may ask for
pub const MAX_DESCRIPTOR_ARRAY_LEN: u32 = 64;

/// One resource binding visible to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorDeclaration {
    /// Descriptor set index
    pub set: u32,
    /// Binding within the set
    pub binding: u32,
    /// Resource kind
    pub kind: DescriptorKind,
    /// Stages that access it
    pub stages: ShaderStages,
    /// Array length
    pub count: u32,
}

impl DescriptorDeclaration {
    /// Single uniform buffer in set 0
    pub fn uniform_buffer(binding: u32, stages: ShaderStages) -> Self {
        Self {
            set: 0,
            binding,
            kind: DescriptorKind::UniformBuffer,
            stages,
            count: 1,
        }
    }

    /// Single combined image sampler in set 0
    pub fn image_sampler(binding: u32, stages: ShaderStages) -> Self {
        Self {
            set: 0,
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            stages,
            count: 1,
        }
    }
}

/// Settings for one graphics pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfiguration {
    /// Primitive assembly
    pub topology: PrimitiveTopology,
    /// Rasterization mode
    pub polygon_mode: PolygonMode,
    /// Face culling
    pub cull_mode: CullMode,
    /// Front-face winding
    pub front_face: FrontFace,
    /// Color blending
    pub blend_mode: BlendMode,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<VertexBinding>,
    /// Vertex attributes
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Resource bindings
    pub descriptors: Vec<DescriptorDeclaration>,
}

impl Default for PipelineConfiguration {
    /// Triangle list, filled, back-face culled, clockwise, alpha blended, with
    /// the [`Vertex`] layout, a vertex-stage uniform buffer at binding 0 and a
    /// fragment-stage sampler at binding 1
    fn default() -> Self {
        Self {
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Clockwise,
            blend_mode: BlendMode::Alpha,
            vertex_bindings: vec![VertexBinding {
                binding: 0,
                stride: mem::size_of::<Vertex>() as u32,
                input_rate: VertexInputRate::Vertex,
            }],
            vertex_attributes: vec![
                VertexAttribute {
                    location: 0,
                    binding: 0,
                    format: AttributeFormat::RgbF32,
                    offset: mem::offset_of!(Vertex, pos) as u32,
                },
                VertexAttribute {
                    location: 1,
                    binding: 0,
                    format: AttributeFormat::RgbF32,
                    offset: mem::offset_of!(Vertex, color) as u32,
                },
            ],
            descriptors: vec![
                DescriptorDeclaration::uniform_buffer(0, ShaderStages::VERTEX),
                DescriptorDeclaration::image_sampler(1, ShaderStages::FRAGMENT),
            ],
        }
    }
}

impl Config for PipelineConfiguration {}

impl PipelineConfiguration {
    /// Line-list wireframe variant of the default
    pub fn wireframe_lines() -> Self {
        Self {
            topology: PrimitiveTopology::LineList,
            polygon_mode: PolygonMode::Wireframe,
            cull_mode: CullMode::None,
            ..Self::default()
        }
    }

    /// Set topology
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set polygon mode
    pub fn with_polygon_mode(mut self, polygon_mode: PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    /// Set cull mode
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set front face
    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// Set blend mode
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Check internal consistency
    pub fn validate(&self) -> VulkanResult<()> {
        let fail = |msg: String| Err(VulkanError::PipelineCreationFailed(msg));

        for attribute in &self.vertex_attributes {
            let Some(binding) = self.vertex_bindings.iter().find(|b| b.binding == attribute.binding) else {
                return fail(format!(
                    "Attribute at location {} reads unknown binding {}",
                    attribute.location, attribute.binding
                ));
            };
            let end = attribute.offset.checked_add(attribute.format.size());
            if !end.is_some_and(|end| end <= binding.stride) {
                return fail(format!(
                    "Attribute at location {} overruns stride {}",
                    attribute.location, binding.stride
                ));
            }
        }

        for declaration in &self.descriptors {
            if declaration.count == 0 {
                return fail(format!("Descriptor binding {} has zero count", declaration.binding));
            }
            if declaration.stages.is_empty() {
                return fail(format!("Descriptor binding {} is used by no stage", declaration.binding));
            }
        }

        self.set_layout_bindings().map(|_| ())
    }

    /// Vulkan vertex binding descriptions
    pub fn vk_vertex_bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        self.vertex_bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: b.input_rate.to_vk(),
            })
            .collect()
    }

    /// Vulkan vertex attribute descriptions
    pub fn vk_vertex_attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.vertex_attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format.to_vk(),
                offset: a.offset,
            })
            .collect()
    }

    /// Layout bindings for every descriptor set, indexed by set number
    ///
    /// Declarations sharing a set and binding are merged: their stages are
    /// combined and the larger count wins. Merging two different kinds is an
    /// error. Unused set numbers below the highest one get an empty layout.
    pub fn set_layout_bindings(&self) -> VulkanResult<Vec<Vec<vk::DescriptorSetLayoutBinding>>> {
        let mut merged: BTreeMap<(u32, u32), DescriptorDeclaration> = BTreeMap::new();
        for declaration in &self.descriptors {
            if declaration.count > MAX_DESCRIPTOR_ARRAY_LEN {
                return Err(VulkanError::PipelineCreationFailed(format!(
                    "Set {} binding {} asks for {} descriptors; at most {MAX_DESCRIPTOR_ARRAY_LEN} are supported",
                    declaration.set, declaration.binding, declaration.count
                )));
            }
            if declaration.set >= MAX_DESCRIPTOR_SETS {
                return Err(VulkanError::PipelineCreationFailed(format!(
                    "Set {} binding {} is beyond the {MAX_DESCRIPTOR_SETS} supported descriptor sets",
                    declaration.set, declaration.binding
                )));
            }
            match merged.get_mut(&(declaration.set, declaration.binding)) {
                Some(existing) if existing.kind != declaration.kind => {
                    return Err(VulkanError::PipelineCreationFailed(format!(
                        "Set {} binding {} declared as both {:?} and {:?}",
                        declaration.set, declaration.binding, existing.kind, declaration.kind
                    )));
                }
                Some(existing) => {
                    existing.stages |= declaration.stages;
                    existing.count = existing.count.max(declaration.count);
                }
                None => {
                    merged.insert((declaration.set, declaration.binding), *declaration);
                }
            }
        }

        let set_count = merged.keys().map(|&(set, _)| set as usize + 1).max().unwrap_or(0);
        let mut sets = vec![Vec::new(); set_count];
        for declaration in merged.values() {
            sets[declaration.set as usize].push(vk::DescriptorSetLayoutBinding {
                binding: declaration.binding,
                descriptor_type: declaration.kind.to_vk(),
                descriptor_count: declaration.count,
                stage_flags: declaration.stages.to_vk(),
                p_immutable_samplers: std::ptr::null(),
            });
        }

        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_vertex_layout() {
        let config = PipelineConfiguration::default();
        let bindings = config.vk_vertex_bindings();
        let expected = Vertex::binding_description();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, expected.stride);
        assert_eq!(bindings[0].input_rate, expected.input_rate);

        let attributes = config.vk_vertex_attributes();
        for (actual, expected) in attributes.iter().zip(Vertex::attribute_descriptions()) {
            assert_eq!(actual.location, expected.location);
            assert_eq!(actual.format, expected.format);
            assert_eq!(actual.offset, expected.offset);
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enum_conversions() {
        assert_eq!(PrimitiveTopology::LineList.to_vk(), vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(PolygonMode::Wireframe.to_vk(), vk::PolygonMode::LINE);
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(FrontFace::CounterClockwise.to_vk(), vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(AttributeFormat::RgF32.to_vk(), vk::Format::R32G32_SFLOAT);
        assert_eq!(
            (ShaderStages::VERTEX | ShaderStages::FRAGMENT).to_vk(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_blend_factors() {
        let alpha = BlendMode::Alpha.attachment_state();
        assert_eq!(alpha.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);

        let additive = BlendMode::AdditiveRgb.attachment_state();
        assert_eq!(additive.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn test_descriptor_layout_derivation() {
        let sets = PipelineConfiguration::default().set_layout_bindings().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].len(), 2);
        assert_eq!(sets[0][0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sets[0][0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(sets[0][1].binding, 1);
        assert_eq!(sets[0][1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn test_duplicate_bindings_merge_stages() {
        let mut config = PipelineConfiguration::default();
        config.descriptors.push(DescriptorDeclaration {
            count: 2,
            ..DescriptorDeclaration::uniform_buffer(0, ShaderStages::FRAGMENT)
        });

        let sets = config.set_layout_bindings().unwrap();
        assert_eq!(sets[0].len(), 2);
        assert_eq!(
            sets[0][0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(sets[0][0].descriptor_count, 2);
    }

    #[test]
    fn test_conflicting_kinds_rejected() {
        let mut config = PipelineConfiguration::default();
        config
            .descriptors
            .push(DescriptorDeclaration::image_sampler(0, ShaderStages::VERTEX));
        assert!(matches!(
            config.set_layout_bindings(),
            Err(VulkanError::PipelineCreationFailed(_))
        ));
    }

    #[test]
    fn test_sparse_sets_get_empty_layouts() {
        let mut config = PipelineConfiguration::default();
        config.descriptors.push(DescriptorDeclaration {
            set: 2,
            ..DescriptorDeclaration::uniform_buffer(0, ShaderStages::VERTEX)
        });
        let sets = config.set_layout_bindings().unwrap();
        assert_eq!(sets.len(), 3);
        assert!(sets[1].is_empty());
        assert_eq!(sets[2].len(), 1);
    }

    #[test]
    fn test_validate_catches_bad_attribute() {
        let mut config = PipelineConfiguration::default();
        config.vertex_attributes[1].offset = 16;
        assert!(config.validate().is_err());

        let mut config = PipelineConfiguration::default();
        config.vertex_attributes[0].binding = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_attribute_offset_overflow_rejected() {
        let mut config = PipelineConfiguration::default();
        config.vertex_attributes[1].offset = u32::MAX - 4;
        assert!(matches!(
            config.validate(),
            Err(VulkanError::PipelineCreationFailed(_))
        ));
    }

    #[test]
    fn test_set_index_is_capped() {
        let mut config = PipelineConfiguration::default();
        config.descriptors.push(DescriptorDeclaration {
            set: MAX_DESCRIPTOR_SETS - 1,
            ..DescriptorDeclaration::uniform_buffer(0, ShaderStages::VERTEX)
        });
        assert_eq!(config.set_layout_bindings().unwrap().len(), MAX_DESCRIPTOR_SETS as usize);

        for set in [MAX_DESCRIPTOR_SETS, u32::MAX] {
            let mut config = PipelineConfiguration::default();
            config.descriptors.push(DescriptorDeclaration {
                set,
                ..DescriptorDeclaration::uniform_buffer(0, ShaderStages::VERTEX)
            });
            assert!(config.set_layout_bindings().is_err());
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_descriptor_array_length_is_capped() {
        let mut config = PipelineConfiguration::default();
        config.descriptors.push(DescriptorDeclaration {
            count: MAX_DESCRIPTOR_ARRAY_LEN,
            ..DescriptorDeclaration::image_sampler(2, ShaderStages::FRAGMENT)
        });
        assert!(config.validate().is_ok());

        config.descriptors[2].count = MAX_DESCRIPTOR_ARRAY_LEN + 1;
        assert!(config.set_layout_bindings().is_err());
    }

    #[test]
    fn test_wireframe_preset() {
        let config = PipelineConfiguration::wireframe_lines();
        assert_eq!(config.topology, PrimitiveTopology::LineList);
        assert_eq!(config.polygon_mode, PolygonMode::Wireframe);
        assert_eq!(config.blend_mode, BlendMode::Alpha);
    }

    #[test]
    fn test_ron_round_trip() {
        let config = PipelineConfiguration::default().with_blend_mode(BlendMode::AdditiveRgb);
        let text = ron::to_string(&config).unwrap();
        let parsed: PipelineConfiguration = ron::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}

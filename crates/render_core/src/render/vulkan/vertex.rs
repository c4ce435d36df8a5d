//! Vertex and uniform payload layouts

use std::mem;

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Vertex with position and color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in model space
    pub pos: [f32; 3],
    /// Linear RGB color
    pub color: [f32; 3],
}

impl Vertex {
    /// Indices drawing [`Vertex::unit_quad`] as two clockwise triangles
    pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

    /// Create a vertex
    pub const fn new(pos: [f32; 3], color: [f32; 3]) -> Self {
        Self { pos, color }
    }

    /// Four corners of a unit square centered on the origin
    pub fn unit_quad() -> [Self; 4] {
        [
            Self::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0]),
            Self::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0]),
            Self::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
            Self::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0]),
        ]
    }

    /// Get vertex input binding description
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Get vertex attribute descriptions
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Self, color) as u32,
            },
        ]
    }
}

/// Per-frame transform block bound at descriptor binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Model matrix, column-major
    pub model: [[f32; 4]; 4],
    /// View matrix, column-major
    pub view: [[f32; 4]; 4],
    /// Projection matrix, column-major
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    /// All three matrices set to identity
    pub fn identity() -> Self {
        Self {
            model: Self::IDENTITY,
            view: Self::IDENTITY,
            proj: Self::IDENTITY,
        }
    }
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(mem::size_of::<Vertex>(), 24);
        assert_eq!(Vertex::binding_description().stride, 24);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert!(attributes.iter().all(|a| a.format == vk::Format::R32G32B32_SFLOAT));
    }

    #[test]
    fn test_uniform_block_is_three_matrices() {
        assert_eq!(mem::size_of::<UniformBufferObject>(), 192);
        assert_eq!(bytemuck::bytes_of(&UniformBufferObject::identity()).len(), 192);
    }

    #[test]
    fn test_quad_indices_stay_in_range() {
        let quad = Vertex::unit_quad();
        assert!(Vertex::QUAD_INDICES.iter().all(|&i| (i as usize) < quad.len()));
    }
}

//! Vulkan rendering backend
//!
//! Resource ownership follows one rule: every GPU object is wrapped in a type
//! that destroys it on drop, and every wrapper holds a clone of the logical
//! device handle. The [`DeviceContext`] owns the device itself and must be
//! dropped after everything created from it.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod pipeline_config;
pub mod recorder;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;
pub mod window;

pub use buffer::{BufferKind, GpuBuffer, IndexBuffer, MappedMemory, UniformBuffers, VertexBuffer};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder, ScopedCommandBuffer};
pub use context::{DeviceContext, QueueRole};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetWriter, FrameDescriptorSets};
pub use device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilies, QueueFamilyIndices};
pub use error::{ErrorKind, VulkanError, VulkanResult};
pub use frame::{FrameBegin, FrameScheduler, FrameSlotState, FrameSlotTracker, FrameToken, PresentOutcome};
pub use framebuffer::Framebuffer;
pub use image::{ImageLayoutState, ImageResource, LayoutTransition, QueueOwnershipTransfer};
pub use instance::VulkanInstance;
pub use memory::{MemoryVisibility, SharingPolicy};
pub use pipeline::PipelineStateObject;
pub use pipeline_config::{
    AttributeFormat, BlendMode, CullMode, DescriptorDeclaration, DescriptorKind, FrontFace,
    PipelineConfiguration, PolygonMode, PrimitiveTopology, ShaderStages, VertexAttribute,
    VertexBinding, VertexInputRate,
};
pub use recorder::{record_frame, DrawState, RenderTarget};
pub use render_pass::RenderPass;
pub use renderer::{FrameStatus, Renderer};
pub use shader::{ShaderKind, ShaderModule, ShaderStage};
pub use swapchain::{Swapchain, SwapchainManager, SwapchainSupport};
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::Texture;
pub use vertex::{UniformBufferObject, Vertex};
pub use window::{wait_for_drawable_size, SurfaceWindow, Window, WindowError};

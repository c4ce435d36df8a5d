//! Rendering backends
//!
//! Only the Vulkan backend exists; it is exposed as [`vulkan`] and its main
//! types are re-exported here.

pub mod vulkan;

pub use vulkan::{PipelineConfiguration, Renderer, Window};

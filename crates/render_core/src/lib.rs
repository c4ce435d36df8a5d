//! # Render Core
//!
//! The GPU-facing core of a Vulkan renderer.
//!
//! ## Features
//!
//! - **Device Context**: instance, surface, queue-family selection and logical device
//! - **Swapchain**: format/present-mode/extent negotiation and recreation on resize
//! - **Frame Synchronization**: N frames in flight guarded by per-slot fences
//! - **GPU Resources**: buffers, staged uploads, images with explicit layout transitions
//! - **Command Recording**: per-frame command buffers and scoped one-shot submissions
//! - **Pipeline State Objects**: compiled from a serializable configuration value
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     render_core::foundation::logging::init();
//!
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let mut renderer = Renderer::new(&mut window, &config, &PipelineConfiguration::default())?;
//!
//!     renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES)?;
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_frame(&mut window, &UniformBufferObject::identity())?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RendererConfig, ShaderConfig, WindowConfig},
        render::vulkan::{
            BlendMode, CullMode, DescriptorDeclaration, DescriptorKind, ErrorKind,
            FrameStatus, FrontFace, PipelineConfiguration, PolygonMode, PrimitiveTopology,
            Renderer, ShaderStages, SurfaceWindow, UniformBufferObject, Vertex, VulkanError,
            VulkanResult, Window, WindowError,
        },
    };
}

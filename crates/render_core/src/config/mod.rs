//! # Configuration System
//!
//! Serializable configuration for the renderer. Files are loaded through the
//! [`Config`] trait, which understands TOML and RON by file extension.
//!
//! The pipeline configuration value object lives with the pipeline code in
//! [`crate::render::vulkan::PipelineConfiguration`]; it implements [`Config`]
//! as well so it can be kept in its own file.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Loaded values failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Shader byte-code locations
///
/// The renderer consumes pre-compiled SPIR-V; it never compiles GLSL itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Looks in the usual build output and resource directories so the demo
    /// works from the workspace root as well as from its own crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = [
            "target/shaders/",
            "../target/shaders/",
            "shaders/",
            "resources/shaders/",
            "./",
        ];

        let find = |name: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
        };

        Self {
            vertex_shader_path: find(base_vertex)
                .unwrap_or_else(|| format!("target/shaders/{base_vertex}")),
            fragment_shader_path: find(base_fragment)
                .unwrap_or_else(|| format!("target/shaders/{base_fragment}")),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.vertex_shader_path).exists() {
            return Err(format!("Vertex shader not found: {}", self.vertex_shader_path));
        }
        if !Path::new(&self.fragment_shader_path).exists() {
            return Err(format!("Fragment shader not found: {}", self.fragment_shader_path));
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("shader.vert.spv", "shader.frag.spv")
    }
}

/// Initial window parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Render Core".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// # Vulkan Renderer Configuration
///
/// Application metadata, frame pacing and debug features for the Vulkan
/// backend. `max_frames_in_flight` is fixed for the renderer's lifetime;
/// changing it means building a new renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Window parameters
    pub window: WindowConfig,
    /// Shader configuration
    pub shaders: ShaderConfig,
    /// Number of frame slots recorded ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (`None` follows the build type)
    pub enable_validation: Option<bool>,
    /// Clear colour for the colour attachment (RGBA)
    pub clear_color: [f32; 4],
    /// Optional texture bound to combined image sampler descriptors
    pub texture_path: Option<String>,
    /// Default log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
            max_frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            texture_path: None,
            log_level: "info".to_string(),
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set window parameters
    pub fn with_window(mut self, title: impl Into<String>, width: u32, height: u32) -> Self {
        self.window = WindowConfig {
            title: title.into(),
            width,
            height,
        };
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the clear colour
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set a texture file for sampler bindings
    pub fn with_texture(mut self, path: impl Into<String>) -> Self {
        self.texture_path = Some(path.into());
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate everything except the presence of shader files
    pub fn validate_settings(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.max_frames_in_flight == 0 {
            return Err("Max frames in flight must be at least 1".to_string());
        }

        if self.max_frames_in_flight > 8 {
            return Err("Max frames in flight should not exceed 8".to_string());
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            ));
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.validate_settings()?;
        self.shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Render Core Application")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("render_core_{}_{name}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_default_config_settings_are_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.validate_settings().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        let zero = RendererConfig::default().with_max_frames_in_flight(0);
        assert!(zero.validate_settings().is_err());

        let many = RendererConfig::default().with_max_frames_in_flight(9);
        assert!(many.validate_settings().is_err());

        let three = RendererConfig::default().with_max_frames_in_flight(3);
        assert!(three.validate_settings().is_ok());
    }

    #[test]
    fn test_zero_window_size_rejected() {
        let config = RendererConfig::default().with_window("test", 0, 600);
        assert!(config.validate_settings().is_err());
    }

    #[test]
    fn test_missing_shaders_fail_validation() {
        let config = RendererConfig::default()
            .with_shaders(ShaderConfig::new("does/not/exist.vert.spv", "nor/this.frag.spv"));
        let err = config.validate().unwrap_err();
        assert!(err.contains("Vertex shader not found"));
    }

    #[test]
    fn test_toml_file_round_trip() {
        let path = format!("{}.toml", temp_path("renderer"));
        let config = RendererConfig::new("toml test")
            .with_window("toml window", 1024, 768)
            .with_max_frames_in_flight(3)
            .with_clear_color([0.1, 0.2, 0.3, 1.0]);

        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.application_name, "toml test");
        assert_eq!(loaded.window, config.window);
        assert_eq!(loaded.max_frames_in_flight, 3);
        approx::assert_relative_eq!(loaded.clear_color[2], 0.3);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let path = format!("{}.ron", temp_path("partial"));
        std::fs::write(&path, "(application_name: \"ron app\", max_frames_in_flight: 4)").unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.application_name, "ron app");
        assert_eq!(loaded.max_frames_in_flight, 4);
        assert_eq!(loaded.window, WindowConfig::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let result = RendererConfig::load_from_file("renderer.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))));

        let result = RendererConfig::default().save_to_file("renderer.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}

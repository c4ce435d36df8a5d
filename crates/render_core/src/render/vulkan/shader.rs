//! SPIR-V shader modules and pipeline stages

use std::ffi::CString;
use std::io::Cursor;
use std::path::Path;

use ash::{vk, Device};

use super::error::{VulkanError, VulkanResult};
use crate::config::ShaderConfig;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words, checking size and magic number
pub fn parse_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::AssetLoad(format!("Invalid SPIR-V: {e}")))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&word) => Err(VulkanError::AssetLoad(format!(
            "Invalid SPIR-V magic number {word:#010x}"
        ))),
        None => Err(VulkanError::AssetLoad("Empty SPIR-V module".to_string())),
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| VulkanError::PipelineCreationFailed(format!("Shader module: {e:?}")))?;

        Ok(Self { device, module })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| VulkanError::AssetLoad(format!("Failed to read shader {}: {e}", path.display())))?;

        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline stage a module runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    /// Vertex stage
    Vertex,
    /// Fragment stage
    Fragment,
}

impl ShaderKind {
    /// Vulkan stage flag
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Compiled module bound to a stage and entry point
pub struct ShaderStage {
    kind: ShaderKind,
    module: ShaderModule,
    entry: CString,
}

impl ShaderStage {
    /// Wrap `module` as a `main` entry point for `kind`
    pub fn new(kind: ShaderKind, module: ShaderModule) -> Self {
        Self {
            kind,
            module,
            entry: CString::from(c"main"),
        }
    }

    /// Use a different entry point name
    pub fn with_entry(mut self, entry: &str) -> VulkanResult<Self> {
        self.entry = CString::new(entry)
            .map_err(|_| VulkanError::PipelineCreationFailed(format!("Entry point {entry:?} contains NUL")))?;
        Ok(self)
    }

    /// Load a SPIR-V file as `kind`
    pub fn load<P: AsRef<Path>>(device: Device, kind: ShaderKind, path: P) -> VulkanResult<Self> {
        Ok(Self::new(kind, ShaderModule::from_file(device, path)?))
    }

    /// Vertex and fragment stages from configured paths
    pub fn from_config(device: &Device, config: &ShaderConfig) -> VulkanResult<Vec<Self>> {
        Ok(vec![
            Self::load(device.clone(), ShaderKind::Vertex, &config.vertex_shader_path)?,
            Self::load(device.clone(), ShaderKind::Fragment, &config.fragment_shader_path)?,
        ])
    }

    /// Stage kind
    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    /// Underlying module
    pub fn module(&self) -> &ShaderModule {
        &self.module
    }

    /// Stage create info; borrows the entry point name from `self`
    pub fn create_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.kind.stage_flags())
            .module(self.module.handle())
            .name(&self.entry)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_accepts_spirv_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        assert!(matches!(parse_spirv(&bytes), Err(VulkanError::AssetLoad(_))));
    }

    #[test]
    fn test_rejects_truncated_words() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC]);
        bytes.push(0);
        assert!(parse_spirv(&bytes).is_err());
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(ShaderKind::Vertex.stage_flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderKind::Fragment.stage_flags(), vk::ShaderStageFlags::FRAGMENT);
    }
}

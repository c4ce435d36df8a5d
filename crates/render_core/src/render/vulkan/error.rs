//! Vulkan error taxonomy
//!
//! Every fallible operation in the backend returns [`VulkanResult`]. Callers
//! use [`VulkanError::kind`] to decide between aborting startup, skipping a
//! frame, or treating the failure as a programming error.

use ash::vk;
use thiserror::Error;

use super::image::ImageLayoutState;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The Vulkan loader library could not be found or loaded
    #[error("Failed to load Vulkan: {0}")]
    LoaderUnavailable(String),

    /// No physical device satisfies the queue, extension and surface requirements
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// A required instance or device extension is not available
    #[error("Required extension missing: {0}")]
    MissingRequiredExtension(String),

    /// The window system could not provide a presentation surface
    #[error("Surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    /// Device, swapchain or other startup object creation failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The presentation surface no longer matches the swapchain
    #[error("Presentation surface is out of date")]
    SurfaceOutOfDate,

    /// Memory allocation or resource creation failed
    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailed {
        /// Number of bytes that were requested
        requested: u64,
        /// Driver result or description of the failure
        reason: String,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Requested image layout transition is not in the supported set
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        /// Current layout of the image
        from: ImageLayoutState,
        /// Requested layout
        to: ImageLayoutState,
    },

    /// Command buffer recording or submission failed
    #[error("Command recording failed: {0}")]
    RecordingFailed(String),

    /// Graphics pipeline compilation failed
    #[error("Pipeline creation failed: {0}")]
    PipelineCreationFailed(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Shader or texture file could not be read or decoded
    #[error("Asset load failed: {0}")]
    AssetLoad(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Recovery class of a [`VulkanError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup cannot continue
    FatalInitialization,
    /// Recovered by recreating the swapchain and dropping one frame
    TransientPresentation,
    /// Resource exhaustion; treated as fatal
    ResourceCreation,
    /// The caller asked for something the API contract forbids
    ContractViolation,
    /// The logical device or the surface was lost; treated as fatal
    DeviceLost,
    /// Any other runtime failure reported by the driver
    Runtime,
}

impl VulkanError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoaderUnavailable(_)
            | Self::NoSuitableDevice(_)
            | Self::MissingRequiredExtension(_)
            | Self::SurfaceCreationFailed(_)
            | Self::InitializationFailed(_) => ErrorKind::FatalInitialization,
            Self::SurfaceOutOfDate => ErrorKind::TransientPresentation,
            Self::AllocationFailed { .. } | Self::NoSuitableMemoryType => ErrorKind::ResourceCreation,
            Self::UnsupportedLayoutTransition { .. } | Self::InvalidOperation { .. } => {
                ErrorKind::ContractViolation
            }
            Self::Api(result) => match *result {
                vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                    ErrorKind::TransientPresentation
                }
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
                | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                | vk::Result::ERROR_TOO_MANY_OBJECTS
                | vk::Result::ERROR_OUT_OF_POOL_MEMORY => ErrorKind::ResourceCreation,
                vk::Result::ERROR_INITIALIZATION_FAILED
                | vk::Result::ERROR_INCOMPATIBLE_DRIVER
                | vk::Result::ERROR_EXTENSION_NOT_PRESENT
                | vk::Result::ERROR_LAYER_NOT_PRESENT
                | vk::Result::ERROR_FEATURE_NOT_PRESENT => ErrorKind::FatalInitialization,
                vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR => ErrorKind::DeviceLost,
                _ => ErrorKind::Runtime,
            },
            Self::RecordingFailed(_) | Self::PipelineCreationFailed(_) | Self::AssetLoad(_) => {
                ErrorKind::Runtime
            }
        }
    }

    /// Whether the error must abort the application
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::FatalInitialization | ErrorKind::ResourceCreation | ErrorKind::DeviceLost
        )
    }

    /// Whether the error is recovered by swapchain recreation
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientPresentation
    }

    /// Wrap an allocation result code
    pub(crate) fn allocation(requested: u64, result: vk::Result) -> Self {
        Self::AllocationFailed {
            requested,
            reason: format!("{result:?}"),
        }
    }
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            other => Self::Api(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_errors_are_fatal() {
        let errors = [
            VulkanError::NoSuitableDevice("none".into()),
            VulkanError::MissingRequiredExtension("VK_KHR_swapchain".into()),
            VulkanError::SurfaceCreationFailed("no display".into()),
        ];
        for error in &errors {
            assert_eq!(error.kind(), ErrorKind::FatalInitialization);
            assert!(error.is_fatal());
            assert!(!error.is_transient());
        }
    }

    #[test]
    fn test_stale_surface_is_transient() {
        assert!(VulkanError::SurfaceOutOfDate.is_transient());
        assert!(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR).is_transient());
        assert!(!VulkanError::SurfaceOutOfDate.is_fatal());
    }

    #[test]
    fn test_out_of_date_result_converts_to_surface_error() {
        let error = VulkanError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(error, VulkanError::SurfaceOutOfDate));
        assert!(error.is_transient());

        let error = VulkanError::from(vk::Result::TIMEOUT);
        assert!(matches!(error, VulkanError::Api(vk::Result::TIMEOUT)));
    }

    #[test]
    fn test_device_loss_is_fatal() {
        for result in [vk::Result::ERROR_DEVICE_LOST, vk::Result::ERROR_SURFACE_LOST_KHR] {
            let error = VulkanError::from(result);
            assert_eq!(error.kind(), ErrorKind::DeviceLost);
            assert!(error.is_fatal());
            assert!(!error.is_transient());
        }
        assert_eq!(VulkanError::Api(vk::Result::TIMEOUT).kind(), ErrorKind::Runtime);
        assert!(!VulkanError::Api(vk::Result::TIMEOUT).is_fatal());
    }

    #[test]
    fn test_allocation_failure_is_resource_creation() {
        let error = VulkanError::allocation(1024, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(error.kind(), ErrorKind::ResourceCreation);
        assert!(error.is_fatal());
        assert!(error.to_string().contains("1024"));
        assert_eq!(
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).kind(),
            ErrorKind::ResourceCreation
        );
    }

    #[test]
    fn test_layout_transition_is_contract_violation() {
        let error = VulkanError::UnsupportedLayoutTransition {
            from: ImageLayoutState::ShaderReadOnly,
            to: ImageLayoutState::TransferDst,
        };
        assert_eq!(error.kind(), ErrorKind::ContractViolation);
        assert!(!error.is_fatal());
    }
}

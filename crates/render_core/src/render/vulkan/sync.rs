//! Semaphores, fences and the per-slot bundle the frame scheduler owns

use ash::{vk, Device};

use super::error::{VulkanError, VulkanResult};

/// Binary semaphore ordering work between queue operations
pub struct Semaphore {
    device: Device,
    handle: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let handle = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(|e| VulkanError::allocation(0, e))?;
        Ok(Self { device, handle })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.handle, None) };
    }
}

/// CPU-visible completion signal for a queue submission
pub struct Fence {
    device: Device,
    handle: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let handle = unsafe { device.create_fence(&create_info, None) }.map_err(|e| VulkanError::allocation(0, e))?;
        Ok(Self { device, handle })
    }

    /// Block until signaled, with no timeout
    pub fn wait(&self) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.handle], true, u64::MAX) }.map_err(VulkanError::Api)
    }

    /// Return to the unsignaled state before reuse in a submission
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.handle]) }.map_err(VulkanError::Api)
    }

    /// Poll without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(self.handle) }.map_err(VulkanError::Api)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.handle, None) };
    }
}

/// Synchronization objects owned by one frame slot
pub struct FrameSync {
    /// Signaled by acquire; waited on at color-attachment output
    pub image_available: Semaphore,
    /// Signaled by the slot's submission; waited on by present
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission completes
    ///
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create the objects for one slot
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
        })
    }
}

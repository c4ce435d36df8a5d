//! Vulkan device context
//!
//! Owns the instance, presentation surface, selected physical device, logical
//! device and one command pool per queue role. Everything else in the backend
//! borrows the context; it is created first and destroyed last.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

use super::commands::{CommandPool, CommandRecorder, ScopedCommandBuffer};
use super::device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilies};
use super::error::{VulkanError, VulkanResult};
use super::instance::VulkanInstance;
use super::window::SurfaceWindow;

/// Queue a piece of GPU work is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    /// Drawing, and image transitions that end in shader or attachment use
    Graphics,
    /// Staged copies and image initialization
    Transfer,
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Field order is drop order: pools, then the device, then the instance.
/// The surface is destroyed explicitly in `Drop`.
pub struct DeviceContext {
    graphics_pool: CommandPool,
    transfer_pool: CommandPool,
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    instance: VulkanInstance,
}

impl DeviceContext {
    /// Create instance, surface, device and command pools for `window`
    pub fn new<W: SurfaceWindow + ?Sized>(
        window: &mut W,
        app_name: &str,
        app_version: (u32, u32, u32),
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, app_version, enable_validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_surface(instance.instance.handle())
            .map_err(|e| VulkanError::SurfaceCreationFailed(e.to_string()))?;

        // Nothing owns the surface until the context exists.
        let destroy_surface = |error: VulkanError| {
            unsafe { surface_loader.destroy_surface(surface, None) };
            error
        };

        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader)
            .map_err(destroy_surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device).map_err(destroy_surface)?;

        let families = physical_device.families;
        let pools = CommandPool::new(device.device.clone(), families.graphics).and_then(|graphics| {
            CommandPool::new(device.device.clone(), families.transfer).map(|transfer| (graphics, transfer))
        });
        let (graphics_pool, transfer_pool) = match pools {
            Ok(pools) => pools,
            Err(e) => {
                drop(device);
                return Err(destroy_surface(e));
            }
        };

        Ok(Self {
            graphics_pool,
            transfer_pool,
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
        })
    }

    /// Get the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the instance wrapper
    pub fn vulkan_instance(&self) -> &VulkanInstance {
        &self.instance
    }

    /// Get the raw logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Memory heaps and types of the physical device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Queue families in use
    pub fn families(&self) -> QueueFamilies {
        self.device.families
    }

    /// Queue family index for `role`
    pub fn family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.device.families.graphics,
            QueueRole::Transfer => self.device.families.transfer,
        }
    }

    /// Queue for `role`
    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.device.graphics_queue,
            QueueRole::Transfer => self.device.transfer_queue,
        }
    }

    /// Command pool for `role`
    pub fn command_pool(&self, role: QueueRole) -> &CommandPool {
        match role {
            QueueRole::Graphics => &self.graphics_pool,
            QueueRole::Transfer => &self.transfer_pool,
        }
    }

    /// Queue used for presentation (may alias the graphics queue)
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the surface handle
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Whether anisotropic filtering was enabled on the device
    pub fn sampler_anisotropy(&self) -> bool {
        self.physical_device.features.sampler_anisotropy == vk::TRUE
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Record and synchronously execute a one-shot command buffer on `role`'s queue
    pub fn submit_scoped<F>(&self, role: QueueRole, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        ScopedCommandBuffer::run(self.command_pool(role), self.queue(role), record)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

//! Physical device selection and logical device creation

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};
use std::ffi::CStr;

use super::error::{VulkanError, VulkanResult};
use super::swapchain::SwapchainSupport;

/// Result of scanning a device's queue families
///
/// Any of the three roles may be missing; only a complete set can be used to
/// create a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for draw submission
    pub graphics: Option<u32>,
    /// Family used for staged uploads and image initialization
    pub transfer: Option<u32>,
    /// Family able to present to the surface
    pub present: Option<u32>,
}

/// Complete set of queue family indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family used for draw submission
    pub graphics: u32,
    /// Family used for staged uploads and image initialization
    pub transfer: u32,
    /// Family able to present to the surface
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Pick graphics, transfer and present families
    ///
    /// Graphics prefers a family that also advertises transfer and sparse
    /// binding. Transfer prefers a family without the graphics bit so uploads
    /// can run beside rendering, falling back to the graphics family. Present
    /// prefers the graphics family to avoid a separate queue.
    pub fn select<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> VulkanResult<Self>
    where
        F: FnMut(u32) -> VulkanResult<bool>,
    {
        let full_graphics = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING;
        let graphics = usable_families(families)
            .find(|&(_, f)| f.queue_flags.contains(full_graphics))
            .or_else(|| usable_families(families).find(|&(_, f)| f.queue_flags.contains(vk::QueueFlags::GRAPHICS)))
            .map(|(i, _)| i);

        let transfer = usable_families(families)
            .find(|&(_, f)| is_dedicated_transfer(f) && f.queue_flags.contains(vk::QueueFlags::SPARSE_BINDING))
            .or_else(|| usable_families(families).find(|&(_, f)| is_dedicated_transfer(f)))
            .map(|(i, _)| i)
            .or(graphics);

        let mut present = None;
        if let Some(graphics) = graphics {
            if supports_present(graphics)? {
                present = Some(graphics);
            }
        }
        if present.is_none() {
            for (index, _) in usable_families(families) {
                if supports_present(index)? {
                    present = Some(index);
                    break;
                }
            }
        }

        Ok(Self {
            graphics,
            transfer,
            present,
        })
    }

    /// Whether every role has a family
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.transfer.is_some() && self.present.is_some()
    }

    /// Convert into a complete set
    pub fn complete(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            transfer: self.transfer?,
            present: self.present?,
        })
    }
}

fn usable_families(
    families: &[vk::QueueFamilyProperties],
) -> impl Iterator<Item = (u32, &vk::QueueFamilyProperties)> + '_ {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.queue_count > 0)
        .map(|(index, family)| (index as u32, family))
}

fn is_dedicated_transfer(family: &vk::QueueFamilyProperties) -> bool {
    family.queue_flags.contains(vk::QueueFlags::TRANSFER) && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
}

impl QueueFamilies {
    /// Distinct family indices, sorted
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.transfer, self.present];
        families.sort_unstable();
        families.dedup();
        families
    }

    /// Whether uploads run on a family separate from rendering
    pub fn has_dedicated_transfer(&self) -> bool {
        self.graphics != self.transfer
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Selected queue families
    pub families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Select the first device that can render and present to `surface`
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };
        if devices.is_empty() {
            return Err(VulkanError::NoSuitableDevice("no Vulkan physical devices present".to_string()));
        }

        let mut rejections = Vec::new();
        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!(
                        "Selected GPU: {} (graphics family {}, transfer family {}, present family {})",
                        info.name(),
                        info.families.graphics,
                        info.families.transfer,
                        info.families.present
                    );
                    return Ok(info);
                }
                Err(reason) => {
                    log::debug!("Rejected GPU: {reason}");
                    rejections.push(reason.to_string());
                }
            }
        }

        Err(VulkanError::NoSuitableDevice(rejections.join("; ")))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let name = device_name(&properties);

        let indices = QueueFamilyIndices::select(&queue_families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .map_err(VulkanError::Api)
        })?;
        let families = indices.complete().ok_or_else(|| {
            VulkanError::NoSuitableDevice(format!("{name}: incomplete queue families {indices:?}"))
        })?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::MissingRequiredExtension(format!(
                "{name}: {:?}",
                SwapchainLoader::name()
            )));
        }

        let support = SwapchainSupport::query(surface_loader, device, surface)?;
        if !support.is_adequate() {
            return Err(VulkanError::NoSuitableDevice(format!(
                "{name}: surface reports no formats or present modes"
            )));
        }

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            families,
        })
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        device_name(&self.properties)
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Transfer operations queue (aliases graphics without a dedicated family)
    pub transfer_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Queue family indices the queues were taken from
    pub families: QueueFamilies,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one queue per distinct family
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical_device_info.families;
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical_device_info.features.sampler_anisotropy == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("vkCreateDevice: {e:?}")))?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let transfer_queue = unsafe { device.get_device_queue(families.transfer, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            transfer_queue,
            present_queue,
            families,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

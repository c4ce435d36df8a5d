//! Memory type selection and queue sharing rules

use ash::{vk, Device};

use super::device::QueueFamilies;
use super::error::{VulkanError, VulkanResult};

/// Where a resource's backing memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVisibility {
    /// GPU-only memory, populated through staging buffers
    DeviceLocal,
    /// Host-mappable memory that needs no explicit flushes
    HostCoherent,
}

impl MemoryVisibility {
    /// Property flags a memory type must have
    pub fn property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::HostCoherent => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        }
    }

    /// Whether memory of this class can be mapped
    pub fn is_mappable(self) -> bool {
        self == Self::HostCoherent
    }
}

/// Find memory type with required properties
///
/// `type_filter` is the `memory_type_bits` mask from the resource's memory
/// requirements.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Allocate memory satisfying `requirements` with `visibility`
pub fn allocate(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    visibility: MemoryVisibility,
) -> VulkanResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        memory_properties,
        requirements.memory_type_bits,
        visibility.property_flags(),
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.allocate_memory(&alloc_info, None) }
        .map_err(|e| VulkanError::allocation(requirements.size, e))
}

/// How a resource is shared between queue families
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharingPolicy {
    /// Owned by one family at a time
    Exclusive,
    /// Usable from all listed families without ownership transfer
    Concurrent(Vec<u32>),
}

impl SharingPolicy {
    /// Concurrent across the distinct families when uploads use a dedicated
    /// transfer family, exclusive otherwise
    pub fn for_families(families: &QueueFamilies) -> Self {
        if families.has_dedicated_transfer() {
            Self::Concurrent(families.unique())
        } else {
            Self::Exclusive
        }
    }

    /// Vulkan sharing mode
    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    /// Family indices to pass alongside a concurrent sharing mode
    pub fn family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(families) => families,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        properties
    }

    #[test]
    fn test_finds_first_matching_type() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = MemoryVisibility::HostCoherent.property_flags();
        assert_eq!(find_memory_type(&properties, 0b111, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&properties, 0b111, MemoryVisibility::DeviceLocal.property_flags()).unwrap(),
            0
        );
    }

    #[test]
    fn test_type_filter_excludes_types() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(
            find_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
        assert!(matches!(
            find_memory_type(&properties, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_sharing_policy_follows_transfer_family() {
        let shared = QueueFamilies {
            graphics: 0,
            transfer: 0,
            present: 0,
        };
        assert_eq!(SharingPolicy::for_families(&shared), SharingPolicy::Exclusive);
        assert_eq!(SharingPolicy::Exclusive.mode(), vk::SharingMode::EXCLUSIVE);
        assert!(SharingPolicy::Exclusive.family_indices().is_empty());

        let dedicated = QueueFamilies {
            graphics: 0,
            transfer: 2,
            present: 0,
        };
        let policy = SharingPolicy::for_families(&dedicated);
        assert_eq!(policy.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(policy.family_indices(), &[0, 2]);
    }

    #[test]
    fn test_only_host_coherent_is_mappable() {
        assert!(MemoryVisibility::HostCoherent.is_mappable());
        assert!(!MemoryVisibility::DeviceLocal.is_mappable());
    }
}

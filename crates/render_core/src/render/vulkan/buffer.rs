//! Buffer management for vertex, index and uniform data
//!
//! Host-coherent buffers are written through a scoped [`MappedMemory`] guard.
//! Device-local buffers are filled with the staged-upload path: the payload
//! goes into a temporary staging buffer, a copy runs on the transfer queue,
//! and the staging buffer is destroyed once the queue is idle.

use std::marker::PhantomData;
use std::mem;

use ash::{vk, Device};
use bytemuck::Pod;

use super::context::{DeviceContext, QueueRole};
use super::error::{VulkanError, VulkanResult};
use super::memory::{self, MemoryVisibility, SharingPolicy};
use super::vertex::Vertex;

/// What a buffer is used for; fixes its usage flags and memory class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local vertex data
    Vertex,
    /// Device-local 16-bit indices
    Index,
    /// Host-coherent per-frame uniform data
    Uniform,
    /// Host-coherent source of a staged upload
    Staging,
    /// Host-coherent destination for reading device data back
    Readback,
}

impl BufferKind {
    /// Usage flags for this kind
    ///
    /// Device-local kinds can also be copied from so their contents can be
    /// verified through a readback buffer.
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            Self::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory class for this kind
    pub fn visibility(self) -> MemoryVisibility {
        match self {
            Self::Vertex | Self::Index => MemoryVisibility::DeviceLocal,
            Self::Uniform | Self::Staging | Self::Readback => MemoryVisibility::HostCoherent,
        }
    }
}

/// Buffer handle paired with its backing memory
pub struct GpuBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    kind: BufferKind,
    visibility: MemoryVisibility,
}

impl GpuBuffer {
    /// Create a buffer of `size` bytes with explicit usage and memory class
    ///
    /// Device-local buffers are shared between the transfer and graphics
    /// families when they differ.
    pub fn create_buffer(
        context: &DeviceContext,
        kind: BufferKind,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        visibility: MemoryVisibility,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{kind:?} buffer requested with zero size"),
            });
        }

        let sharing = match visibility {
            MemoryVisibility::DeviceLocal => SharingPolicy::for_families(&context.families()),
            MemoryVisibility::HostCoherent => SharingPolicy::Exclusive,
        };
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing.mode())
            .queue_family_indices(sharing.family_indices());

        let device = context.device().clone();
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| VulkanError::allocation(size, e))?;

        // Null memory is valid to free, so Drop covers partial construction.
        let mut created = Self {
            device,
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            kind,
            visibility,
        };

        let requirements = unsafe { created.device.get_buffer_memory_requirements(buffer) };
        created.memory = memory::allocate(&created.device, context.memory_properties(), requirements, visibility)?;

        unsafe {
            created
                .device
                .bind_buffer_memory(buffer, created.memory, 0)
                .map_err(|e| VulkanError::allocation(size, e))?;
        }

        Ok(created)
    }

    /// Create a buffer with the default usage and memory class of `kind`
    pub fn new(context: &DeviceContext, kind: BufferKind, size: vk::DeviceSize) -> VulkanResult<Self> {
        Self::create_buffer(context, kind, size, kind.usage(), kind.visibility())
    }

    /// Create a device-local buffer of `kind` holding `bytes`
    pub fn upload_staged(context: &DeviceContext, kind: BufferKind, bytes: &[u8]) -> VulkanResult<Self> {
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Self::new(context, BufferKind::Staging, size)?;
        staging.map()?.write(0, bytes)?;

        let destination = Self::create_buffer(context, kind, size, kind.usage(), MemoryVisibility::DeviceLocal)?;
        staging.copy_to(context, &destination)?;

        log::trace!("Staged {size} bytes into {kind:?} buffer");
        Ok(destination)
    }

    /// Copy the whole buffer into a readback buffer and return its bytes
    pub fn read_back(&self, context: &DeviceContext) -> VulkanResult<Vec<u8>> {
        if self.visibility.is_mappable() {
            return Ok(self.map_read()?.read().to_vec());
        }

        let mut readback = Self::new(context, BufferKind::Readback, self.size)?;
        self.copy_to(context, &readback)?;
        let bytes = readback.map()?.read().to_vec();
        Ok(bytes)
    }

    /// Copy this buffer's contents into `destination` on the transfer queue
    pub fn copy_to(&self, context: &DeviceContext, destination: &Self) -> VulkanResult<()> {
        if destination.size < self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Copy of {} bytes into a {} byte buffer",
                    self.size, destination.size
                ),
            });
        }

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.size,
        };
        context.submit_scoped(QueueRole::Transfer, |recorder| {
            recorder.cmd_copy_buffer(self.buffer, destination.buffer, &[region]);
            Ok(())
        })
    }

    /// Map the whole buffer; unmapped when the guard drops
    pub fn map(&mut self) -> VulkanResult<MappedMemory<'_>> {
        self.map_read()
    }

    /// Write `bytes` at offset 0 through a temporary mapping
    pub fn write_bytes(&mut self, bytes: &[u8]) -> VulkanResult<()> {
        self.map()?.write(0, bytes)
    }

    fn map_read(&self) -> VulkanResult<MappedMemory<'_>> {
        if !self.visibility.is_mappable() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{:?} buffer in device-local memory cannot be mapped", self.kind),
            });
        }

        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };

        Ok(MappedMemory {
            device: &self.device,
            memory: self.memory,
            ptr: ptr.cast::<u8>(),
            len: self.size as usize,
            _buffer: PhantomData,
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Kind the buffer was created as
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Memory class of the backing allocation
    pub fn visibility(&self) -> MemoryVisibility {
        self.visibility
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Host mapping of a buffer's memory
///
/// Cannot outlive the buffer; unmaps on drop.
pub struct MappedMemory<'a> {
    device: &'a Device,
    memory: vk::DeviceMemory,
    ptr: *mut u8,
    len: usize,
    _buffer: PhantomData<&'a GpuBuffer>,
}

impl MappedMemory<'_> {
    /// Copy `bytes` into the mapping at `offset`
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> VulkanResult<()> {
        let fits = offset.checked_add(bytes.len()).is_some_and(|end| end <= self.len);
        if !fits {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Write of {} bytes at offset {offset} overruns {} byte mapping",
                    bytes.len(),
                    self.len
                ),
            });
        }

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    /// Copy a slice of plain values into the mapping at offset 0
    pub fn write_pod<T: Pod>(&mut self, data: &[T]) -> VulkanResult<()> {
        self.write(0, bytemuck::cast_slice(data))
    }

    /// View the mapped bytes
    pub fn read(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.unmap_memory(self.memory);
        }
    }
}

/// Device-local vertex buffer
pub struct VertexBuffer {
    buffer: GpuBuffer,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Upload `vertices` through a staging buffer
    pub fn new(context: &DeviceContext, vertices: &[Vertex]) -> VulkanResult<Self> {
        let buffer = GpuBuffer::upload_staged(context, BufferKind::Vertex, bytemuck::cast_slice(vertices))?;
        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Underlying buffer
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }
}

/// Device-local 16-bit index buffer
pub struct IndexBuffer {
    buffer: GpuBuffer,
    index_count: u32,
}

impl IndexBuffer {
    /// Upload `indices` through a staging buffer
    pub fn new(context: &DeviceContext, indices: &[u16]) -> VulkanResult<Self> {
        let buffer = GpuBuffer::upload_staged(context, BufferKind::Index, bytemuck::cast_slice(indices))?;
        Ok(Self {
            buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Index element type
    pub fn index_type(&self) -> vk::IndexType {
        vk::IndexType::UINT16
    }

    /// Underlying buffer
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }
}

/// One host-coherent uniform buffer per frame slot
pub struct UniformBuffers<T: Pod> {
    buffers: Vec<GpuBuffer>,
    _payload: PhantomData<T>,
}

impl<T: Pod> UniformBuffers<T> {
    /// Create `frames_in_flight` buffers sized for `T`
    pub fn new(context: &DeviceContext, frames_in_flight: usize) -> VulkanResult<Self> {
        let size = mem::size_of::<T>() as vk::DeviceSize;
        let buffers = (0..frames_in_flight)
            .map(|_| GpuBuffer::new(context, BufferKind::Uniform, size))
            .collect::<VulkanResult<Vec<_>>>()?;

        Ok(Self {
            buffers,
            _payload: PhantomData,
        })
    }

    /// Write `payload` into `slot`'s buffer
    ///
    /// The caller guarantees the slot's fence has been waited on.
    pub fn update(&mut self, slot: usize, payload: &T) -> VulkanResult<()> {
        let count = self.buffers.len();
        let buffer = self.buffers.get_mut(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Uniform slot {slot} out of range for {count} frames"),
        })?;
        let mut mapped = buffer.map()?;
        mapped.write_pod(std::slice::from_ref(payload))
    }

    /// Buffer handle for `slot`
    pub fn handle(&self, slot: usize) -> Option<vk::Buffer> {
        self.buffers.get(slot).map(GpuBuffer::handle)
    }

    /// Bytes bound per descriptor
    pub fn range(&self) -> vk::DeviceSize {
        mem::size_of::<T>() as vk::DeviceSize
    }

    /// Number of per-slot copies
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether there are no copies
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer for `slot`
    pub fn buffer(&self, slot: usize) -> Option<&GpuBuffer> {
        self.buffers.get(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_local_kinds_take_transfers() {
        for kind in [BufferKind::Vertex, BufferKind::Index] {
            assert_eq!(kind.visibility(), MemoryVisibility::DeviceLocal);
            assert!(kind.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
    }

    #[test]
    fn test_host_kinds_are_mappable() {
        for kind in [BufferKind::Uniform, BufferKind::Staging, BufferKind::Readback] {
            assert!(kind.visibility().is_mappable());
        }
        assert_eq!(BufferKind::Staging.usage(), vk::BufferUsageFlags::TRANSFER_SRC);
        assert_eq!(BufferKind::Readback.usage(), vk::BufferUsageFlags::TRANSFER_DST);
    }

    #[test]
    fn test_index_and_vertex_usage_match_binding_point() {
        assert!(BufferKind::Vertex.usage().contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferKind::Index.usage().contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(BufferKind::Uniform.usage().contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
    }
}

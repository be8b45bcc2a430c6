// Buffer utilities for vertex, index, and uniform buffers
//
// All memory goes through the gpu-allocator collaborator. Geometry and
// uniform data are written through persistently mapped host-visible
// allocations, so no staging pass is needed.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::error::{BackendError, BackendResult};
use super::VulkanDevice;

/// Create a host-visible, persistently mapped buffer.
pub fn create_host_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    name: &str,
) -> BackendResult<(vk::Buffer, Allocation)> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let allocation = match device.allocator().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location: MemoryLocation::CpuToGpu,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    if let Err(e) = unsafe {
        device
            .device
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
    } {
        unsafe { device.device.destroy_buffer(buffer, None) };
        let _ = device.allocator().free(allocation);
        return Err(e.into());
    }

    Ok((buffer, allocation))
}

/// Copy `data` into a mapped allocation at `offset`.
pub fn write_mapped(
    allocation: &mut Allocation,
    offset: usize,
    data: &[u8],
) -> BackendResult<()> {
    let mapped = allocation
        .mapped_slice_mut()
        .ok_or(BackendError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
    mapped[offset..offset + data.len()].copy_from_slice(data);
    Ok(())
}

/// Combined vertex + index buffer: index data sits directly after the
/// vertex data, so draws bind the same buffer twice with a byte offset.
pub struct MeshBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub vertex_bytes: vk::DeviceSize,
    pub index_count: u32,
}

impl MeshBuffer {
    pub fn create(
        device: &VulkanDevice,
        vertex_data: &[u8],
        index_data: &[u8],
        index_count: u32,
    ) -> BackendResult<Self> {
        let total = (vertex_data.len() + index_data.len()) as vk::DeviceSize;
        let (buffer, mut allocation) = create_host_buffer(
            device,
            total,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER,
            "mesh buffer",
        )?;

        let write = write_mapped(&mut allocation, 0, vertex_data)
            .and_then(|_| write_mapped(&mut allocation, vertex_data.len(), index_data));
        if let Err(e) = write {
            unsafe { device.device.destroy_buffer(buffer, None) };
            let _ = device.allocator().free(allocation);
            return Err(e);
        }

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            vertex_bytes: vertex_data.len() as vk::DeviceSize,
            index_count,
        })
    }

    /// Idempotent; must be called with the device idle.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        if self.buffer != vk::Buffer::null() {
            unsafe { device.device.destroy_buffer(self.buffer, None) };
            self.buffer = vk::Buffer::null();
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = device.allocator().free(allocation);
        }
    }
}

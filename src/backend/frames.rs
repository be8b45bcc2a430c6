// Frame slots - per-in-flight-frame recording resources
//
// One command buffer and one mapped uniform region per frame slot,
// allocated once at startup from a single pool and reused round-robin.
// Slot count never changes, regardless of how many images the swapchain
// negotiates.

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use super::buffer::{create_host_buffer, write_mapped};
use super::error::BackendResult;
use super::VulkanDevice;

struct UniformSlot {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

pub struct FrameSlots {
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    uniforms: Vec<UniformSlot>,
    uniform_size: vk::DeviceSize,
}

impl FrameSlots {
    pub fn create(
        device: &VulkanDevice,
        frames_in_flight: usize,
        uniform_size: vk::DeviceSize,
    ) -> BackendResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        let command_buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) }
        {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e.into());
            }
        };

        let mut slots = Self {
            command_pool,
            command_buffers,
            uniforms: Vec::with_capacity(frames_in_flight),
            uniform_size,
        };

        for i in 0..frames_in_flight {
            match create_host_buffer(
                device,
                uniform_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                &format!("frame uniforms {}", i),
            ) {
                Ok((buffer, allocation)) => slots.uniforms.push(UniformSlot {
                    buffer,
                    allocation: Some(allocation),
                }),
                Err(e) => {
                    slots.destroy(device);
                    return Err(e);
                }
            }
        }

        log::info!("Allocated {} frame slots", frames_in_flight);

        Ok(slots)
    }

    pub fn command_buffer(&self, frame_slot: usize) -> vk::CommandBuffer {
        self.command_buffers[frame_slot]
    }

    pub fn uniform_buffer(&self, frame_slot: usize) -> vk::Buffer {
        self.uniforms[frame_slot].buffer
    }

    pub fn uniform_buffers(&self) -> Vec<vk::Buffer> {
        self.uniforms.iter().map(|u| u.buffer).collect()
    }

    pub fn uniform_size(&self) -> vk::DeviceSize {
        self.uniform_size
    }

    /// Copy this frame's uniform data into the slot's mapped region. Only
    /// safe once the slot's fence has been waited on.
    pub fn write_uniform(&mut self, frame_slot: usize, data: &[u8]) -> BackendResult<()> {
        debug_assert!(data.len() as vk::DeviceSize <= self.uniform_size);
        if let Some(allocation) = self.uniforms[frame_slot].allocation.as_mut() {
            write_mapped(allocation, 0, data)?;
        }
        Ok(())
    }

    /// Idempotent; releases the uniform allocations, then the pool (which
    /// frees the command buffers with it). Device must be idle.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        for slot in &mut self.uniforms {
            if slot.buffer != vk::Buffer::null() {
                unsafe { device.device.destroy_buffer(slot.buffer, None) };
                slot.buffer = vk::Buffer::null();
            }
            if let Some(allocation) = slot.allocation.take() {
                let _ = device.allocator().free(allocation);
            }
        }
        self.uniforms.clear();
        self.command_buffers.clear();

        if self.command_pool != vk::CommandPool::null() {
            unsafe { device.device.destroy_command_pool(self.command_pool, None) };
            self.command_pool = vk::CommandPool::null();
        }
    }
}

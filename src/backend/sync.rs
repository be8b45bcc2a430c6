// Synchronization primitives
//
// Per-frame-slot fences and acquire semaphores, plus one render-finished
// semaphore per swapchain image. The two groups are sized independently:
// slot count is fixed for the lifetime of the session, image count can
// change whenever the swapchain is recreated.

use ash::vk;

use super::error::BackendResult;
use super::VulkanDevice;

pub struct SyncObjects {
    /// CPU-wait fence per frame slot, created signaled so the first use of
    /// each slot does not block.
    in_flight_fences: Vec<vk::Fence>,
    /// Signaled when the acquired image becomes available, per frame slot.
    acquire_semaphores: Vec<vk::Semaphore>,
    /// Signaled when rendering into an image completes, per swapchain image.
    render_finished_semaphores: Vec<vk::Semaphore>,
}

impl SyncObjects {
    pub fn create(
        device: &VulkanDevice,
        frames_in_flight: usize,
        image_count: usize,
    ) -> BackendResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            in_flight_fences: Vec::with_capacity(frames_in_flight),
            acquire_semaphores: Vec::with_capacity(frames_in_flight),
            render_finished_semaphores: Vec::new(),
        };

        unsafe {
            for _ in 0..frames_in_flight {
                match device.device.create_fence(&fence_info, None) {
                    Ok(fence) => sync.in_flight_fences.push(fence),
                    Err(e) => {
                        sync.destroy(device);
                        return Err(e.into());
                    }
                }
                match device.device.create_semaphore(&semaphore_info, None) {
                    Ok(semaphore) => sync.acquire_semaphores.push(semaphore),
                    Err(e) => {
                        sync.destroy(device);
                        return Err(e.into());
                    }
                }
            }
        }

        sync.match_image_count(device, image_count)?;

        log::info!(
            "Created sync objects: {} frame slots, {} images",
            frames_in_flight,
            image_count
        );

        Ok(sync)
    }

    /// Resize the render-finished group to the chain's image count.
    ///
    /// Called after swapchain recreation; fences and acquire semaphores are
    /// left untouched. The device must be idle, since the old per-image
    /// semaphores may otherwise still be referenced by in-flight work.
    pub fn match_image_count(
        &mut self,
        device: &VulkanDevice,
        image_count: usize,
    ) -> BackendResult<()> {
        if self.render_finished_semaphores.len() == image_count {
            return Ok(());
        }

        unsafe {
            for &semaphore in &self.render_finished_semaphores {
                device.device.destroy_semaphore(semaphore, None);
            }
        }
        self.render_finished_semaphores.clear();

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        for _ in 0..image_count {
            match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
                Ok(semaphore) => self.render_finished_semaphores.push(semaphore),
                Err(e) => {
                    self.destroy(device);
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Destroy all three groups. Must be called only once the device is
    /// idle. Safe to call repeatedly.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        unsafe {
            for &semaphore in &self.render_finished_semaphores {
                device.device.destroy_semaphore(semaphore, None);
            }
            for &semaphore in &self.acquire_semaphores {
                device.device.destroy_semaphore(semaphore, None);
            }
            for &fence in &self.in_flight_fences {
                device.device.destroy_fence(fence, None);
            }
        }
        self.render_finished_semaphores.clear();
        self.acquire_semaphores.clear();
        self.in_flight_fences.clear();
    }

    pub fn in_flight_fence(&self, frame_slot: usize) -> vk::Fence {
        self.in_flight_fences[frame_slot]
    }

    pub fn acquire_semaphore(&self, frame_slot: usize) -> vk::Semaphore {
        self.acquire_semaphores[frame_slot]
    }

    pub fn render_finished_semaphore(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished_semaphores[image_index as usize]
    }
}

// Frame cycle - the per-frame state machine
//
// Drives wait -> acquire -> record -> submit -> present against the
// swapchain, sync objects, and frame slots it borrows. The fence wait at
// the top of the cycle is the only place the CPU blocks; everything else
// is ordered through semaphores.
//
// Two independent index spaces meet here: the frame slot (fixed count,
// advances round-robin per completed iteration) and the image index
// returned by acquire (count can change across recreations). Slot-owned
// primitives are indexed by the former, the render-finished semaphore by
// the latter.

use ash::vk;

use super::error::BackendResult;
use super::frames::FrameSlots;
use super::swapchain::{ImageAcquire, Swapchain};
use super::sync::SyncObjects;
use super::VulkanDevice;

/// Render content supplied by the application for one frame: everything
/// the recording step binds that the frame cycle does not own itself.
pub struct RenderContent<'a> {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    /// One set per frame slot, indexed by the current slot.
    pub descriptor_sets: &'a [vk::DescriptorSet],
    /// Combined vertex + index buffer; indices start at `vertex_bytes`.
    pub vertex_buffer: vk::Buffer,
    pub vertex_bytes: vk::DeviceSize,
    pub index_count: u32,
    pub instance_count: u32,
    pub clear_color: [f32; 4],
}

/// What a completed iteration asks of the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// The chain is stale (out-of-date or suboptimal); recreate before the
    /// next frame.
    SwapchainStale,
}

pub struct FrameCycle {
    frame_index: usize,
    frames_in_flight: usize,
}

impl FrameCycle {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frame_index: 0,
            frames_in_flight,
        }
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.frames_in_flight;
    }

    /// Execute one frame. Returns without advancing the frame index when
    /// acquisition reports the chain out of date, so the iteration is
    /// retried on the same slot after recreation.
    pub fn draw_frame(
        &mut self,
        device: &VulkanDevice,
        swapchain: &Swapchain,
        sync: &SyncObjects,
        frames: &mut FrameSlots,
        content: &RenderContent,
        uniform_data: &[u8],
    ) -> BackendResult<FrameOutcome> {
        let slot = self.frame_index;
        let fence = sync.in_flight_fence(slot);

        // Sole blocking point: bounds CPU run-ahead to the slot count
        unsafe {
            device.device.wait_for_fences(&[fence], true, u64::MAX)?;
        }

        // Acquire before resetting the fence: if the chain is out of date
        // nothing gets submitted, and the fence must stay signaled for the
        // retry of this slot.
        let (image_index, mut stale) = match swapchain.acquire(sync.acquire_semaphore(slot))? {
            ImageAcquire::Ready { index, suboptimal } => (index, suboptimal),
            ImageAcquire::OutOfDate => return Ok(FrameOutcome::SwapchainStale),
        };

        unsafe {
            device.device.reset_fences(&[fence])?;
        }

        // The fence wait retired this slot's previous frame, so its mapped
        // uniform region and command buffer are free to reuse
        frames.write_uniform(slot, uniform_data)?;

        let cmd = frames.command_buffer(slot);
        self.record_commands(device, cmd, swapchain, content, image_index, slot)?;

        // Wait for the acquired image at the first stage that writes either
        // attachment; signal the per-image semaphore and the slot fence
        let wait_semaphores = [sync.acquire_semaphore(slot)];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS];
        let signal_semaphores = [sync.render_finished_semaphore(image_index)];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info], fence)?;
        }

        stale |= swapchain.present(
            device.graphics_queue,
            image_index,
            sync.render_finished_semaphore(image_index),
        )?;

        self.advance();

        Ok(if stale {
            FrameOutcome::SwapchainStale
        } else {
            FrameOutcome::Rendered
        })
    }

    /// Rebuild the swapchain after a resize or staleness report, then
    /// resize the per-image semaphore group to the new image count. Frame
    /// and image indices are left untouched.
    pub fn recreate_swapchain(
        &mut self,
        device: &VulkanDevice,
        swapchain: &mut Swapchain,
        sync: &mut SyncObjects,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> BackendResult<()> {
        // Nothing submitted may still reference the chain being replaced
        device.wait_idle()?;

        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;
        log::debug!(
            "Surface now reports {}x{}",
            caps.current_extent.width,
            caps.current_extent.height
        );

        // Second wait brackets the recreate itself, in case a frame was
        // submitted between the first wait and now
        device.wait_idle()?;

        swapchain.recreate(device, surface, surface_loader, preferred_present_mode)?;
        sync.match_image_count(device, swapchain.image_count() as usize)?;

        Ok(())
    }

    fn record_commands(
        &self,
        device: &VulkanDevice,
        cmd: vk::CommandBuffer,
        swapchain: &Swapchain,
        content: &RenderContent,
        image_index: u32,
        slot: usize,
    ) -> BackendResult<()> {
        let d = &device.device;
        let extent = swapchain.extent();

        let color_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let depth_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            ..color_range
        };

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            d.begin_command_buffer(cmd, &begin_info)?;

            // Move both attachments into writable layouts; previous
            // contents are cleared, so UNDEFINED is fine as the old layout
            let to_attachment = [
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                    .src_access_mask(vk::AccessFlags2::empty())
                    .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                    .dst_access_mask(
                        vk::AccessFlags2::COLOR_ATTACHMENT_READ
                            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                    )
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                    .image(swapchain.images()[image_index as usize])
                    .subresource_range(color_range),
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(
                        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                    )
                    .src_access_mask(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE)
                    .dst_stage_mask(
                        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                    )
                    .dst_access_mask(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                    .image(swapchain.depth_image())
                    .subresource_range(depth_range),
            ];
            let dependency_info =
                vk::DependencyInfo::default().image_memory_barriers(&to_attachment);
            d.cmd_pipeline_barrier2(cmd, &dependency_info);

            let color_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(swapchain.image_views()[image_index as usize])
                .image_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: content.clear_color,
                    },
                });

            let depth_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(swapchain.depth_view())
                .image_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                });

            let rendering_info = vk::RenderingInfo::default()
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .layer_count(1)
                .color_attachments(std::slice::from_ref(&color_attachment))
                .depth_attachment(&depth_attachment);

            d.cmd_begin_rendering(cmd, &rendering_info);

            // Extent can change between recreations, so set these per frame
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );

            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, content.pipeline);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                content.pipeline_layout,
                0,
                &[content.descriptor_sets[slot]],
                &[],
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[content.vertex_buffer], &[0]);
            d.cmd_bind_index_buffer(
                cmd,
                content.vertex_buffer,
                content.vertex_bytes,
                vk::IndexType::UINT16,
            );
            d.cmd_draw_indexed(cmd, content.index_count, content.instance_count, 0, 0, 0);

            d.cmd_end_rendering(cmd);

            // Hand the color image over to presentation
            let to_present = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .dst_access_mask(vk::AccessFlags2::empty())
                .old_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .image(swapchain.images()[image_index as usize])
                .subresource_range(color_range);
            let present_dependency = vk::DependencyInfo::default()
                .image_memory_barriers(std::slice::from_ref(&to_present));
            d.cmd_pipeline_barrier2(cmd, &present_dependency);

            d.end_command_buffer(cmd)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_cycles_modulo_slot_count() {
        let mut cycle = FrameCycle::new(2);
        assert_eq!(cycle.frame_index(), 0);
        cycle.advance();
        assert_eq!(cycle.frame_index(), 1);
        cycle.advance();
        assert_eq!(cycle.frame_index(), 0);
        cycle.advance();
        assert_eq!(cycle.frame_index(), 1);
    }

    #[test]
    fn frame_index_survives_five_iterations_with_three_images() {
        // Slot count stays decoupled from image count: five completed
        // iterations with two slots land on slot 1 regardless of how many
        // images the chain negotiated.
        let mut cycle = FrameCycle::new(2);
        for _ in 0..5 {
            cycle.advance();
        }
        assert_eq!(cycle.frame_index(), 1);
    }
}

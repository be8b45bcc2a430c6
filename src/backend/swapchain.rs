// Swapchain - window presentation
//
// Owns the chain of presentable images, their views, and the depth target
// sized to the current surface. Recreation never destroys an old resource
// before the complete replacement set exists, so a failed recreate leaves
// the previous chain usable.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::error::{BackendError, BackendResult};
use super::VulkanDevice;

/// Extent used when the surface reports an undefined current extent.
const FALLBACK_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 640,
    height: 480,
};

/// Depth formats tried in order; both carry a stencil aspect.
const DEPTH_FORMAT_CANDIDATES: [vk::Format; 2] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

/// Result of an image acquisition.
pub enum ImageAcquire {
    /// An image is ready to render into. `suboptimal` means the chain still
    /// works but should be recreated after this frame completes.
    Ready { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_image: vk::Image,
    depth_view: vk::ImageView,
    depth_allocation: Option<Allocation>,
    format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn create(
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> BackendResult<Self> {
        Self::build(
            device,
            surface,
            surface_loader,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )
    }

    /// Rebuild the chain for the current surface state.
    ///
    /// The new chain, views, and depth target are fully constructed before
    /// anything old is released; the old handle is passed as a recreation
    /// hint and destroyed last. The caller must have waited for the device
    /// to go idle first.
    pub fn recreate(
        &mut self,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> BackendResult<()> {
        let new = Self::build(
            device,
            surface,
            surface_loader,
            preferred_present_mode,
            self.swapchain,
        )?;

        // Old views first, then the depth target (view before parent
        // image), then the old chain handle.
        unsafe {
            for &view in &self.image_views {
                device.device.destroy_image_view(view, None);
            }
            self.image_views.clear();
            self.images.clear();

            if self.depth_view != vk::ImageView::null() {
                device.device.destroy_image_view(self.depth_view, None);
                self.depth_view = vk::ImageView::null();
            }
            if self.depth_image != vk::Image::null() {
                device.device.destroy_image(self.depth_image, None);
                self.depth_image = vk::Image::null();
            }
            if let Some(allocation) = self.depth_allocation.take() {
                let _ = device.allocator().free(allocation);
            }

            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
        }

        *self = new;
        Ok(())
    }

    fn build(
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        preferred_present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> BackendResult<Self> {
        // The graphics queue family must be able to present to this surface
        let family = device.graphics_queue_family;
        let present_supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                family,
                surface,
            )
        }?;
        if !present_supported {
            return Err(BackendError::PresentNotSupported(family));
        }

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;
        let surface_format =
            choose_surface_format(&formats).ok_or(BackendError::NoSurfaceFormats)?;

        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;
        let extent = resolve_extent(&surface_caps);
        let image_count = negotiate_image_count(&surface_caps);
        if image_count == 0 {
            return Err(BackendError::ZeroImageCount);
        }

        // Device-only query; resolved up front so a failure leaves no
        // partially built chain behind
        let depth_format = select_depth_format(device)?;

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;
        // FIFO is the only mode the spec guarantees
        let present_mode = if present_modes.contains(&preferred_present_mode) {
            preferred_present_mode
        } else {
            vk::PresentModeKHR::FIFO
        };

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            image_count,
            present_mode
        );

        let loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        let image_views =
            match create_image_views(&device.device, &images, surface_format.format) {
                Ok(views) => views,
                Err(e) => {
                    unsafe { loader.destroy_swapchain(swapchain, None) };
                    return Err(e);
                }
            };

        let (depth_image, depth_view, depth_allocation) =
            match create_depth_target(device, depth_format, extent) {
                Ok(depth) => depth,
                Err(e) => {
                    unsafe {
                        for &view in &image_views {
                            device.device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e);
                }
            };

        Ok(Self {
            swapchain,
            loader,
            images,
            image_views,
            depth_image,
            depth_view,
            depth_allocation: Some(depth_allocation),
            format: surface_format.format,
            depth_format,
            extent,
        })
    }

    /// Release everything owned by the chain. Safe to call more than once;
    /// accessors return empty/null afterwards. Must only be called with the
    /// device idle.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        unsafe {
            if self.depth_view != vk::ImageView::null() {
                device.device.destroy_image_view(self.depth_view, None);
                self.depth_view = vk::ImageView::null();
            }
            if self.depth_image != vk::Image::null() {
                device.device.destroy_image(self.depth_image, None);
                self.depth_image = vk::Image::null();
            }
            if let Some(allocation) = self.depth_allocation.take() {
                let _ = device.allocator().free(allocation);
            }

            for &view in &self.image_views {
                device.device.destroy_image_view(view, None);
            }
            self.image_views.clear();
            self.images.clear();

            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    /// Acquire the next presentable image, signaling `semaphore` when it
    /// becomes available. Non-blocking apart from driver-internal waits.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> BackendResult<ImageAcquire> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(ImageAcquire::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(ImageAcquire::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Present `image_index`, waiting on `wait_semaphore`. Returns true when
    /// the chain is stale and should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> BackendResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn depth_image(&self) -> vk::Image {
        self.depth_image
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth_view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Prefer an 8-bit sRGB format, else take the first reported one.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Current surface extent, or a fixed default when the surface leaves the
/// extent up to the swapchain.
fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        FALLBACK_EXTENT
    }
}

/// One more than the minimum, clamped to the maximum when one is set
/// (max_image_count == 0 means unbounded).
fn negotiate_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> BackendResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        match unsafe { device.create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                // Unwind the views created so far
                for &view in &views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }

    Ok(views)
}

/// First candidate with optimal-tiling depth/stencil attachment support.
fn select_depth_format(device: &VulkanDevice) -> BackendResult<vk::Format> {
    for &format in &DEPTH_FORMAT_CANDIDATES {
        let props = unsafe {
            device
                .instance
                .get_physical_device_format_properties(device.physical_device, format)
        };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }
    Err(BackendError::NoDepthFormat)
}

/// Device-local depth image + view sized to the chain extent.
fn create_depth_target(
    device: &VulkanDevice,
    format: vk::Format,
    extent: vk::Extent2D,
) -> BackendResult<(vk::Image, vk::ImageView, Allocation)> {
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.device.create_image(&image_info, None) }?;

    let requirements = unsafe { device.device.get_image_memory_requirements(image) };

    let allocation = match device.allocator().allocate(&AllocationCreateDesc {
        name: "depth target",
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            return Err(e.into());
        }
    };

    if let Err(e) = unsafe {
        device
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
    } {
        unsafe { device.device.destroy_image(image, None) };
        let _ = device.allocator().free(allocation);
        return Err(e.into());
    }

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = match unsafe { device.device.create_image_view(&view_info, None) } {
        Ok(view) => view,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            let _ = device.allocator().free(allocation);
            return Err(e.into());
        }
    };

    Ok((image, view, allocation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn surface_format_empty_is_none() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = resolve_extent(&caps);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn extent_falls_back_when_undefined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            ..Default::default()
        };
        let extent = resolve_extent(&caps);
        assert_eq!(
            (extent.width, extent.height),
            (FALLBACK_EXTENT.width, FALLBACK_EXTENT.height)
        );
    }

    #[test]
    fn image_count_is_min_plus_one() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(negotiate_image_count(&caps), 3);
    }

    #[test]
    fn image_count_respects_max() {
        // min == max forces exactly that count
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(negotiate_image_count(&caps), 2);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(negotiate_image_count(&caps), 4);
    }
}

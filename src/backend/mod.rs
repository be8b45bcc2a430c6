// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash with explicit create/destroy lifecycles.
// Destruction order is a contract here, not an afterthought: sync objects
// before the swapchain, the swapchain before the device, the allocator's
// memory before the device handle.

pub mod buffer;
pub mod device;
pub mod error;
pub mod frames;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use error::{BackendError, BackendResult};
pub use frames::FrameSlots;
pub use renderer::{FrameCycle, FrameOutcome, RenderContent};
pub use swapchain::Swapchain;
pub use sync::SyncObjects;

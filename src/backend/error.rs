// Backend error types
//
// Creation-path failures are fatal and carry a distinct kind so callers
// can report them precisely. Presentation staleness (out-of-date or
// suboptimal surfaces) is never represented here; acquire/present report
// it as data and the frame cycle routes it to swapchain recreation.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("GPU allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("surface negotiation produced a zero image count")]
    ZeroImageCount,

    #[error("queue family {0} cannot present to this surface")]
    PresentNotSupported(u32),

    #[error("no supported depth format among candidates")]
    NoDepthFormat,
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Process exit code for a fatal backend error. Vulkan results map to
    /// their (absolute) result code, everything else to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackendError::Vulkan(result) => result.as_raw().abs().max(1),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_errors_keep_their_result_code() {
        let err = BackendError::Vulkan(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.exit_code(), vk::Result::ERROR_DEVICE_LOST.as_raw().abs());
    }

    #[test]
    fn non_vulkan_errors_exit_with_one() {
        assert_eq!(BackendError::NoSurfaceFormats.exit_code(), 1);
        assert_eq!(BackendError::PresentNotSupported(0).exit_code(), 1);
    }
}

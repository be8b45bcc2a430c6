// Shader module loading
//
// Vulkan consumes SPIR-V; the build script compiles the GLSL sources in
// shaders/ when glslc is available, and modules are loaded from disk at
// startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Read a SPIR-V file and create a shader module from it.
pub fn load_shader(device: &VulkanDevice, path: impl AsRef<Path>) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?} (was it compiled?)", path))?;
    create_shader_module(device, &bytes)
        .with_context(|| format!("Failed to create shader module from {:?}", path))
}

/// Create a shader module from SPIR-V bytes.
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // SPIR-V is a stream of 4-byte words; read_spv re-aligns as needed
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V")?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

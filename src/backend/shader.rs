// Shader module loading
//
// The backend only consumes pre-compiled SPIR-V blobs; nothing here
// compiles shader source.

use ash::vk;
use std::fs::File;
use std::path::Path;

use super::device::Device;
use super::error::{init_call, InitializationError};

/// Read a SPIR-V file into aligned 32-bit words.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, InitializationError> {
    let load_failed = |source| InitializationError::ShaderLoadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(load_failed)?;
    ash::util::read_spv(&mut file).map_err(load_failed)
}

/// Shader module destroyed on drop; only needed until the pipeline exists.
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a Device,
}

impl<'a> ShaderModule<'a> {
    pub fn load(device: &'a Device, path: &Path) -> Result<Self, InitializationError> {
        let code = read_spirv(path)?;
        log::debug!("Loaded shader {:?} ({} words)", path, code.len());

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(init_call("vkCreateShaderModule"))?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

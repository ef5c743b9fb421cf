use std::path::Path;

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};

use crate::context::Context;

/// Creates a shader module from SPIR-V bytecode. The bytecode
/// slice comes as bytes, but Vulkan wants u32 words, so it is
/// realigned first; the prefix and suffix of align_to are the
/// misaligned leading and trailing bytes, which must be empty
/// for valid SPIR-V.
pub unsafe fn create_shader_module(
    ctx: &Context,
    bytecode: &[u8],
) -> Result<vk::ShaderModule> {
    let bytecode = Vec::<u8>::from(bytecode);
    let (prefix, code, suffix) = bytecode.align_to::<u32>();
    if !prefix.is_empty() || !suffix.is_empty() {
        return Err(anyhow!("Shader bytecode is not properly aligned."));
    }

    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(bytecode.len())
        .code(code);

    Ok(ctx.device.create_shader_module(&info, None)?)
}

/// Loads a compiled SPIR-V shader from disk and wraps it in a
/// module.
pub unsafe fn load_shader_module(ctx: &Context, path: &Path) -> Result<vk::ShaderModule> {
    let bytecode = std::fs::read(path)
        .map_err(|e| anyhow!("Failed to read shader {}: {}", path.display(), e))?;

    create_shader_module(ctx, &bytecode)
}

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};

use crate::{buffers, commands, context::Context};

/// Creates a 2D image and allocates device memory for it. The
/// image is created in the UNDEFINED layout and must be
/// transitioned before use.
pub unsafe fn create_image(
    ctx: &Context,
    width: u32,
    height: u32,
    format: vk::Format,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::_2D)
        .extent(vk::Extent3D { width, height, depth: 1 })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(tiling)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .samples(vk::SampleCountFlags::_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = ctx.device.create_image(&info, None)?;

    // Allocating memory for an image works exactly like
    // allocating memory for a buffer: query the requirements,
    // find a compatible memory type, allocate and bind.
    let requirements = ctx.device.get_image_memory_requirements(image);
    let memory_properties = ctx.instance.get_physical_device_memory_properties(ctx.physical_device);

    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(buffers::find_memory_type(
            &memory_properties,
            requirements.memory_type_bits,
            properties,
        )?);

    let memory = ctx.device.allocate_memory(&info, None)?;
    ctx.device.bind_image_memory(image, memory, 0)?;
    buffers::note_alloc();

    Ok((image, memory))
}

/// Creates a 2D image view over the given aspect of `image`.
/// Views describe how to access an image and which parts to
/// access; all our images are single-level, single-layer 2D
/// images, so only the format and aspect vary.
pub unsafe fn create_image_view(
    ctx: &Context,
    image: vk::Image,
    format: vk::Format,
    aspects: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .subresource_range(subresource_range);

    Ok(ctx.device.create_image_view(&info, None)?)
}

/// The barrier parameters for one image layout transition:
/// which accesses to wait for and make visible, and between
/// which pipeline stages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Plans a layout transition. Only the transitions the renderer
/// actually performs are supported; asking for any other pair
/// is an error.
pub fn plan_transition(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<TransitionPlan> {
    match (old_layout, new_layout) {
        // A fresh image about to receive a transfer: nothing to
        // wait for, so synchronise from the earliest possible
        // stage into the transfer stage.
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionPlan {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        // A filled texture about to be sampled: the transfer
        // write must have completed before the fragment shader
        // reads it.
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionPlan {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        // A fresh depth image: synchronise into the early
        // fragment tests, where depth reads and writes happen.
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok(TransitionPlan {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        _ => Err(anyhow!("Unsupported layout transition ({:?} to {:?}).", old_layout, new_layout)),
    }
}

/// Selects the image aspect for a transition to `new_layout`:
/// depth transitions get the depth aspect (plus stencil when
/// the format carries one), everything else the color aspect.
pub fn transition_aspect(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        match format {
            vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::DEPTH,
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Records and submits a pipeline barrier transitioning `image`
/// between layouts, blocking until it has executed.
pub unsafe fn transition_image_layout(
    ctx: &Context,
    command_pool: vk::CommandPool,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let plan = plan_transition(old_layout, new_layout)?;
    let aspect_mask = transition_aspect(format, new_layout);

    let command_buffer = commands::begin_single_command(ctx, command_pool)?;

    let subresource = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    // The QUEUE_FAMILY_IGNORED indices mean the barrier does
    // not transfer queue family ownership; everything here
    // lives on the graphics queue.
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource)
        .src_access_mask(plan.src_access)
        .dst_access_mask(plan.dst_access);

    ctx.device.cmd_pipeline_barrier(
        command_buffer,
        plan.src_stage,
        plan.dst_stage,
        vk::DependencyFlags::empty(),
        &[] as &[vk::MemoryBarrier],
        &[] as &[vk::BufferMemoryBarrier],
        &[*barrier],
    );

    commands::end_single_command(ctx, command_pool, command_buffer)
}

/// Copies a buffer's contents into an image, which must be in
/// the TRANSFER_DST_OPTIMAL layout. Blocks until the copy has
/// executed.
pub unsafe fn copy_buffer_to_image(
    ctx: &Context,
    command_pool: vk::CommandPool,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    let command_buffer = commands::begin_single_command(ctx, command_pool)?;

    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    // Zero row length and image height mean the buffer data is
    // tightly packed.
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(subresource)
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D { width, height, depth: 1 });

    ctx.device.cmd_copy_buffer_to_image(
        command_buffer,
        buffer,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[*region],
    );

    commands::end_single_command(ctx, command_pool, command_buffer)
}

/// Finds the first of `candidates` that supports `features`
/// with the given tiling on the physical device.
pub unsafe fn get_supported_format(
    ctx: &Context,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .cloned()
        .find(|&f| {
            let properties = ctx.instance.get_physical_device_format_properties(
                ctx.physical_device,
                f,
            );

            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| anyhow!("Failed to find a supported format."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transition_waits_on_nothing() {
        let plan = plan_transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ).unwrap();

        assert_eq!(plan.src_access, vk::AccessFlags::empty());
        assert_eq!(plan.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(plan.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(plan.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn sample_transition_orders_write_before_read() {
        let plan = plan_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ).unwrap();

        assert_eq!(plan.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(plan.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(plan.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_transition_targets_early_fragment_tests() {
        let plan = plan_transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ).unwrap();

        assert_eq!(plan.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(plan.dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn unsupported_transition_is_an_error() {
        let result = plan_transition(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        assert!(result.is_err());
    }

    #[test]
    fn depth_aspect_follows_format() {
        assert_eq!(
            transition_aspect(vk::Format::D32_SFLOAT, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH,
        );
        assert_eq!(
            transition_aspect(vk::Format::D24_UNORM_S8_UINT, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        );
        assert_eq!(
            transition_aspect(vk::Format::R8G8B8A8_SRGB, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::ImageAspectFlags::COLOR,
        );
    }
}

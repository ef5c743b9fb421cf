use vulkanalia::prelude::v1_0::*;
use anyhow::Result;

use crate::{
    buffers,
    context::Context,
    image::{create_image, create_image_view, get_supported_format, transition_image_layout},
};

/// Selects the depth format: the first of the candidate depth
/// formats that the device supports as an optimal-tiling depth
/// attachment.
pub unsafe fn get_depth_format(ctx: &Context) -> Result<vk::Format> {
    let candidates = &[
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    get_supported_format(
        ctx,
        candidates,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// The depth buffer attached to every framebuffer. One is
/// enough for all frames in flight, since only a single render
/// pass runs on the GPU at a time; it is sized to the swapchain
/// extent and recreated with it.
pub struct DepthBuffer {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

impl DepthBuffer {
    pub unsafe fn create(
        ctx: &Context,
        command_pool: vk::CommandPool,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let format = get_depth_format(ctx)?;

        let (image, memory) = create_image(
            ctx,
            extent.width,
            extent.height,
            format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let view = create_image_view(ctx, image, format, vk::ImageAspectFlags::DEPTH)?;

        // The render pass could handle this transition itself
        // in its initial layout, but doing it explicitly keeps
        // the image's lifecycle in one place.
        transition_image_layout(
            ctx,
            command_pool,
            image,
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;

        Ok(Self { image, memory, view, format })
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        ctx.device.destroy_image_view(self.view, None);
        ctx.device.destroy_image(self.image, None);
        ctx.device.free_memory(self.memory, None);
        buffers::note_free();
    }
}

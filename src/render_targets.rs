use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::*;

use crate::{
    context::Context,
    depth::{get_depth_format, DepthBuffer},
    swapchain::Swapchain,
};

/// Everything the render pass draws into: the render pass
/// itself, the depth buffer, and one framebuffer per swapchain
/// image. These objects all depend on the swapchain's format
/// and extent, so they are created and destroyed together and
/// follow the swapchain through recreation.
pub struct RenderTargets {
    pub render_pass: vk::RenderPass,
    pub depth: DepthBuffer,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTargets {
    pub unsafe fn create(
        ctx: &Context,
        command_pool: vk::CommandPool,
        swapchain: &Swapchain,
    ) -> Result<Self> {
        let render_pass = create_render_pass(ctx, swapchain.format)?;
        let depth = DepthBuffer::create(ctx, command_pool, swapchain.extent)?;

        // One framebuffer per swapchain image view, all sharing
        // the single depth buffer (only one render pass runs on
        // the GPU at a time, so no frame can race another on
        // the depth attachment).
        let framebuffers = swapchain
            .views
            .iter()
            .map(|&view| {
                let attachments = &[view, depth.view];
                let info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(attachments)
                    .width(swapchain.extent.width)
                    .height(swapchain.extent.height)
                    .layers(1);

                ctx.device.create_framebuffer(&info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Render targets created ({} framebuffers).", framebuffers.len());

        Ok(Self {
            render_pass,
            depth,
            framebuffers,
        })
    }

    /// Begins the render pass on the framebuffer for
    /// `image_index`, clearing color and depth.
    pub unsafe fn begin(
        &self,
        ctx: &Context,
        command_buffer: vk::CommandBuffer,
        image_index: usize,
        extent: vk::Extent2D,
    ) {
        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);

        let color_clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.2, 0.4, 0.6, 1.0],
            },
        };

        // Depth clears to 1.0, the far plane, so that the first
        // fragment at every pixel wins the depth test.
        let depth_clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };

        let clear_values = &[color_clear_value, depth_clear_value];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index])
            .render_area(render_area)
            .clear_values(clear_values);

        ctx.device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);
    }

    pub unsafe fn end(&self, ctx: &Context, command_buffer: vk::CommandBuffer) {
        ctx.device.cmd_end_render_pass(command_buffer);
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        self.framebuffers
            .iter()
            .for_each(|&f| ctx.device.destroy_framebuffer(f, None));
        self.depth.destroy(ctx);
        ctx.device.destroy_render_pass(self.render_pass, None);
    }
}

unsafe fn create_render_pass(ctx: &Context, format: vk::Format) -> Result<vk::RenderPass> {
    // The color attachment is one of the swapchain images:
    // cleared at the start of the pass, stored at the end so it
    // can be presented, and transitioned from UNDEFINED (we do
    // not care about its previous contents) to PRESENT_SRC.
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    // The depth attachment is cleared too, but its contents are
    // not needed after the pass, so they are not stored.
    let depth_stencil_attachment = vk::AttachmentDescription::builder()
        .format(get_depth_format(ctx)?)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_stencil_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    // A single subpass, drawing to both attachments.
    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_stencil_attachment_ref);

    // The subpass dependency makes the implicit transition at
    // the start of the pass wait until the swapchain image is
    // actually available, which is signalled at the color
    // attachment output stage; the depth attachment is first
    // touched in the early fragment tests, so that stage is
    // part of the dependency as well.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let attachments = &[color_attachment, depth_stencil_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = ctx.device.create_render_pass(&info, None)?;
    info!("Render pass created.");

    Ok(render_pass)
}

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;

use crate::{commands::FrameCommands, context::Context};

/// The per-frame resources of one frame in flight: its command
/// recorder and the three synchronization primitives of the
/// frame protocol. The semaphores order GPU work (acquire
/// before render, render before present); the fence lets the
/// CPU wait for the frame's previous submission before reusing
/// its resources.
pub struct FrameData {
    pub commands: FrameCommands,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameData {
    pub unsafe fn create(ctx: &Context) -> Result<Self> {
        let commands = FrameCommands::create(ctx)?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let image_available = ctx.device.create_semaphore(&semaphore_info, None)?;
        let render_finished = ctx.device.create_semaphore(&semaphore_info, None)?;

        // The fence starts signalled, so the very first frame
        // does not deadlock waiting for a submission that never
        // happened.
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight = ctx.device.create_fence(&fence_info, None)?;

        Ok(Self {
            commands,
            image_available,
            render_finished,
            in_flight,
        })
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        ctx.device.destroy_semaphore(self.image_available, None);
        ctx.device.destroy_semaphore(self.render_finished, None);
        ctx.device.destroy_fence(self.in_flight, None);
        self.commands.destroy(ctx);
    }
}

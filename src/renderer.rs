use std::path::Path;

use vulkanalia::{
    prelude::v1_0::*,
    vk::KhrSwapchainExtension,
};
use anyhow::{anyhow, Result};
use glam::{Vec2, Vec3};
use log::*;

use crate::{
    buffers,
    context::Context,
    descriptors::{DescriptorLayouts, TextureSlot},
    frame::FrameData,
    mesh::{Mesh2D, Mesh3D},
    pipeline::{create_2d_pipeline, create_3d_pipeline, Pipeline},
    render_targets::RenderTargets,
    scene::Scene,
    swapchain::Swapchain,
    texture::{create_texture_sampler, TextureCache},
};

/// The number of frames processed concurrently: while the GPU
/// renders one frame, the CPU records the next. Two is the
/// sweet spot between latency and keeping both sides busy.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// How long to wait on a frame's fence or an image acquire
/// before giving up (one second, in nanoseconds). A healthy
/// GPU finishes a frame orders of magnitude faster, so running
/// into this means something is wedged, and an error beats a
/// silent hang.
pub const FRAME_TIMEOUT: u64 = 1_000_000_000;

/// The next frame index, cycling through the frames in flight.
pub fn next_frame(frame: usize) -> usize {
    (frame + 1) % MAX_FRAMES_IN_FLIGHT
}

/// The renderer: owns the swapchain and everything downstream
/// of it (render targets, pipelines, per-frame resources), the
/// texture cache, and the scene, and runs the frame protocol.
pub struct Renderer {
    swapchain: Swapchain,
    targets: RenderTargets,
    layouts: DescriptorLayouts,
    pipeline_2d: Pipeline,
    pipeline_3d: Pipeline,
    frames: Vec<FrameData>,
    // Pool for load-time one-shot commands (transfers and
    // layout transitions), separate from the per-frame pools.
    loader_pool: vk::CommandPool,
    sampler: vk::Sampler,
    textures: TextureCache,
    pub scene: Scene,
    frame: usize,
    pub resized: bool,
}

impl Renderer {
    pub unsafe fn create(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(ctx.indices.graphics);
        let loader_pool = ctx.device.create_command_pool(&info, None)?;

        let swapchain = Swapchain::create(ctx, width, height)?;
        let targets = RenderTargets::create(ctx, loader_pool, &swapchain)?;

        let layouts = DescriptorLayouts::create(ctx)?;
        let pipeline_2d = create_2d_pipeline(ctx, targets.render_pass, &layouts)?;
        let pipeline_3d = create_3d_pipeline(ctx, targets.render_pass, &layouts)?;

        let sampler = create_texture_sampler(ctx)?;
        let textures = TextureCache::create(ctx, loader_pool)?;

        let scene = Scene::create(
            ctx,
            &layouts,
            sampler,
            textures.default_views(),
            width,
            height,
        )?;

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameData::create(ctx))
            .collect::<Result<Vec<_>>>()?;

        info!("Renderer created.");

        Ok(Self {
            swapchain,
            targets,
            layouts,
            pipeline_2d,
            pipeline_3d,
            frames,
            loader_pool,
            sampler,
            textures,
            scene,
            frame: 0,
            resized: false,
        })
    }

    /// Adds a cube of the given edge length to the scene and
    /// returns its mesh index.
    pub unsafe fn add_cube(&mut self, ctx: &Context, size: f32) -> Result<usize> {
        let mesh = Mesh3D::cube(
            ctx,
            self.loader_pool,
            &self.layouts,
            self.sampler,
            self.textures.default_views(),
            size,
        )?;

        Ok(self.scene.add_mesh(mesh))
    }

    /// Loads an OBJ model and adds it to the scene, returning
    /// its mesh index.
    pub unsafe fn add_model(&mut self, ctx: &Context, path: &Path) -> Result<usize> {
        let mesh = Mesh3D::from_obj(
            ctx,
            self.loader_pool,
            &self.layouts,
            self.sampler,
            self.textures.default_views(),
            path,
        )?;

        Ok(self.scene.add_mesh(mesh))
    }

    /// Adds a colored quad to the 2D overlay.
    pub unsafe fn add_quad(
        &mut self,
        ctx: &Context,
        position: Vec2,
        size: Vec2,
        color: Vec3,
    ) -> Result<()> {
        let mesh = Mesh2D::quad(ctx, self.loader_pool, position, size, color)?;
        self.scene.add_overlay(mesh);
        Ok(())
    }

    /// Loads a texture and binds it to a slot of a mesh's
    /// material.
    pub unsafe fn set_mesh_texture(
        &mut self,
        ctx: &Context,
        mesh: usize,
        slot: TextureSlot,
        path: &Path,
    ) -> Result<()> {
        let texture = self.textures.load(ctx, self.loader_pool, path)?;
        self.scene.set_mesh_texture(ctx, mesh, slot, self.sampler, texture.view)
    }

    /// Renders and presents one frame, following the frame
    /// protocol: wait for the frame's fence, acquire a
    /// swapchain image, record, submit, present, advance the
    /// frame index. A swapchain reported out of date or
    /// suboptimal at any step triggers recreation.
    pub unsafe fn render(&mut self, ctx: &Context, width: u32, height: u32) -> Result<()> {
        // The frame slot's handles are plain copies, so the
        // slot itself is only borrowed for the recording calls.
        let in_flight = self.frames[self.frame].in_flight;
        let image_available = self.frames[self.frame].image_available;
        let render_finished = self.frames[self.frame].render_finished;

        // Wait until this frame slot's previous submission has
        // finished, so its command buffer and uniform buffers
        // are free to reuse.
        let result = ctx.device.wait_for_fences(
            &[in_flight],
            true,
            FRAME_TIMEOUT,
        )?;

        if result == vk::SuccessCode::TIMEOUT {
            return Err(anyhow!("Timed out waiting for the frame fence."));
        }

        // Acquire the next image to render into. The swapchain
        // may be out of date (the window was resized or its
        // surface otherwise changed), in which case it has to
        // be recreated and the frame retried.
        let result = ctx.device.acquire_next_image_khr(
            self.swapchain.swapchain,
            FRAME_TIMEOUT,
            image_available,
            vk::Fence::null(),
        );

        let (image_index, acquire_code) = match result {
            Ok(ok) => ok,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                return self.recreate_swapchain(ctx, width, height);
            }
            Err(e) => return Err(anyhow!(e)),
        };

        if acquire_code == vk::SuccessCode::TIMEOUT
            || acquire_code == vk::SuccessCode::NOT_READY
        {
            return Err(anyhow!("Timed out acquiring a swapchain image."));
        }

        // Only reset the fence once it is certain the frame
        // will be submitted; resetting before a recreation
        // bail-out would deadlock the next wait on this slot.
        ctx.device.reset_fences(&[in_flight])?;

        self.scene.update(self.frame);

        self.frames[self.frame].commands.reset(ctx)?;
        let command_buffer = self.frames[self.frame].commands.begin(ctx)?;

        self.targets.begin(ctx, command_buffer, image_index as usize, self.swapchain.extent);
        self.scene.draw(
            ctx,
            command_buffer,
            self.frame,
            self.swapchain.extent,
            &self.pipeline_2d,
            &self.pipeline_3d,
        );
        self.targets.end(ctx, command_buffer);

        self.frames[self.frame].commands.end(ctx)?;
        self.frames[self.frame].commands.submit(
            ctx,
            image_available,
            render_finished,
            in_flight,
        )?;

        // Present the image, once rendering has signalled the
        // frame's render-finished semaphore.
        let swapchains = &[self.swapchain.swapchain];
        let image_indices = &[image_index];
        let wait_semaphores = &[render_finished];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = ctx.device.queue_present_khr(ctx.present_queue, &present_info);

        let needs_recreate = match result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) => true,
            Ok(_) => false,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(anyhow!(e)),
        };

        if needs_recreate || self.resized {
            self.resized = false;
            self.recreate_swapchain(ctx, width, height)?;
        }

        self.frame = next_frame(self.frame);

        Ok(())
    }

    /// Tears down and rebuilds the swapchain and its dependent
    /// render targets after the surface changed. The pipelines
    /// survive, since their viewport and scissor are dynamic.
    unsafe fn recreate_swapchain(&mut self, ctx: &Context, width: u32, height: u32) -> Result<()> {
        ctx.device.device_wait_idle()?;

        self.targets.destroy(ctx);
        self.swapchain.destroy(ctx);

        self.swapchain = Swapchain::create(ctx, width, height)?;
        self.targets = RenderTargets::create(ctx, self.loader_pool, &self.swapchain)?;

        self.scene.window_resized(width, height);

        info!("Swapchain recreated ({}x{}).", width, height);
        Ok(())
    }

    /// Destroys everything the renderer owns, children before
    /// parents. The caller must have waited the device idle.
    pub unsafe fn destroy(&mut self, ctx: &Context) {
        for frame in &mut self.frames {
            frame.destroy(ctx);
        }

        self.scene.destroy(ctx);
        self.textures.destroy(ctx);
        ctx.device.destroy_sampler(self.sampler, None);

        self.pipeline_2d.destroy(ctx);
        self.pipeline_3d.destroy(ctx);
        self.layouts.destroy(ctx);

        self.targets.destroy(ctx);
        self.swapchain.destroy(ctx);

        ctx.device.destroy_command_pool(self.loader_pool, None);

        let remaining = buffers::live_allocations();
        if remaining != 0 {
            warn!("{} device allocations still live at renderer teardown.", remaining);
        }

        info!("Destroyed the renderer.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_cycles() {
        assert_eq!(next_frame(0), 1);
        assert_eq!(next_frame(1), 0);

        // Walking the cycle visits every slot exactly once.
        let mut frame = 0;
        let mut seen = vec![false; MAX_FRAMES_IN_FLIGHT];
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            seen[frame] = true;
            frame = next_frame(frame);
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(frame, 0);
    }

    #[test]
    fn two_frames_in_flight() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    }
}

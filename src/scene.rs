use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use glam::Mat4;
use log::*;

use crate::{
    camera::Camera,
    context::Context,
    descriptors::{DefaultViews, DescriptorLayouts, MaterialDescriptors, MaterialKind, TextureSlot, UniformBufferObject},
    mesh::{Mesh2D, Mesh3D},
    pipeline::{set_frame_state, Pipeline, PushConstants, ShadingMode},
};

/// The drawn content: the camera, the 3D meshes, and the 2D
/// overlay meshes. The overlay meshes all share one untextured
/// material (they only need the overlay matrices), while every
/// 3D mesh owns a textured material of its own.
pub struct Scene {
    pub camera: Camera,
    pub shading_mode: ShadingMode,
    meshes_3d: Vec<Mesh3D>,
    meshes_2d: Vec<Mesh2D>,
    overlay_material: MaterialDescriptors,
}

impl Scene {
    pub unsafe fn create(
        ctx: &Context,
        layouts: &DescriptorLayouts,
        sampler: vk::Sampler,
        defaults: DefaultViews,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let overlay_material = MaterialDescriptors::create(
            ctx,
            layouts,
            MaterialKind::Untextured,
            sampler,
            defaults,
        )?;

        Ok(Self {
            camera: Camera::new(width, height),
            shading_mode: ShadingMode::Combined,
            meshes_3d: Vec::new(),
            meshes_2d: Vec::new(),
            overlay_material,
        })
    }

    /// Adds a 3D mesh and returns its index, used later to
    /// address its textures.
    pub fn add_mesh(&mut self, mesh: Mesh3D) -> usize {
        self.meshes_3d.push(mesh);
        self.meshes_3d.len() - 1
    }

    pub fn set_mesh_model(&mut self, mesh: usize, model: Mat4) {
        self.meshes_3d[mesh].model = model;
    }

    pub fn add_overlay(&mut self, mesh: Mesh2D) {
        self.meshes_2d.push(mesh);
    }

    /// Rebinds a texture slot of a 3D mesh. The device is
    /// waited idle first, since the descriptor sets of frames
    /// still in flight are rewritten in place.
    pub unsafe fn set_mesh_texture(
        &mut self,
        ctx: &Context,
        mesh: usize,
        slot: TextureSlot,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) -> Result<()> {
        ctx.device.device_wait_idle()?;
        self.meshes_3d[mesh].set_texture(ctx, slot, sampler, view);
        Ok(())
    }

    pub fn window_resized(&mut self, width: u32, height: u32) {
        self.camera.set_viewport(width, height);
    }

    /// Writes this frame's uniform buffers: the camera matrices
    /// and each mesh's model matrix for the 3D materials, and
    /// the aspect-correcting overlay matrices for the shared 2D
    /// material.
    pub fn update(&self, frame: usize) {
        let view = self.camera.view();
        let proj = self.camera.projection();

        for mesh in &self.meshes_3d {
            mesh.descriptors.update_uniforms(frame, &UniformBufferObject {
                model: mesh.model,
                view,
                proj,
            });
        }

        self.overlay_material.update_uniforms(frame, &UniformBufferObject {
            model: Mat4::IDENTITY,
            view: self.camera.overlay_view(),
            proj: Mat4::IDENTITY,
        });
    }

    /// Records the scene's draw commands: the 2D overlay first
    /// with its pipeline, then the 3D meshes with theirs. The
    /// push constants and dynamic viewport are set once per
    /// pipeline layout.
    pub unsafe fn draw(
        &self,
        ctx: &Context,
        command_buffer: vk::CommandBuffer,
        frame: usize,
        extent: vk::Extent2D,
        pipeline_2d: &Pipeline,
        pipeline_3d: &Pipeline,
    ) {
        let constants = PushConstants::new(self.camera.origin, self.shading_mode);

        if !self.meshes_2d.is_empty() {
            ctx.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_2d.pipeline,
            );
            set_frame_state(ctx, command_buffer, pipeline_2d.layout, extent, &constants);
            self.overlay_material.bind(ctx, command_buffer, pipeline_2d.layout, frame);

            for mesh in &self.meshes_2d {
                mesh.draw(ctx, command_buffer);
            }
        }

        if !self.meshes_3d.is_empty() {
            ctx.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_3d.pipeline,
            );
            set_frame_state(ctx, command_buffer, pipeline_3d.layout, extent, &constants);

            for mesh in &self.meshes_3d {
                mesh.draw(ctx, command_buffer, pipeline_3d.layout, frame);
            }
        }
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        for mesh in &mut self.meshes_3d {
            mesh.destroy(ctx);
        }
        for mesh in &mut self.meshes_2d {
            mesh.destroy(ctx);
        }
        self.overlay_material.destroy(ctx);
        info!("Destroyed the scene.");
    }
}

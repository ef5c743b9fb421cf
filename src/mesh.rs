use std::path::Path;

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use glam::{vec2, Mat4, Vec2, Vec3};

use crate::{
    buffers::{create_device_local_buffer, GpuBuffer},
    context::Context,
    descriptors::{DefaultViews, DescriptorLayouts, MaterialDescriptors, MaterialKind, TextureSlot},
    model::load_obj,
    vertex::{Vertex2D, Vertex3D, UNIT_CUBE},
};

/// Builds the six vertices of a 2D quad (two triangles, no
/// shared corners) at `position` with the given size and color,
/// and their trivial indices.
pub fn quad_geometry(
    position: Vec2,
    size: Vec2,
    color: Vec3,
) -> (Vec<Vertex2D>, Vec<u32>) {
    let corners = [
        position,
        position + vec2(size.x, 0.0),
        position + size,
        position + size,
        position + vec2(0.0, size.y),
        position,
    ];

    let vertices = corners
        .iter()
        .map(|&corner| Vertex2D::new(corner, color))
        .collect::<Vec<_>>();
    let indices = (0..6).collect();

    (vertices, indices)
}

/// Builds the 36 vertices of a cube of the given edge length,
/// and their trivial indices.
pub fn cube_geometry(size: f32) -> (Vec<Vertex3D>, Vec<u32>) {
    let vertices = UNIT_CUBE
        .iter()
        .map(|v| {
            let mut vertex = *v;
            vertex.position *= size;
            vertex
        })
        .collect::<Vec<_>>();
    let indices = (0..36).collect();

    (vertices, indices)
}

/// A 2D overlay mesh: vertex and index buffers, with the
/// placement baked into the vertices. All overlay meshes share
/// the scene's untextured material, so the mesh itself carries
/// no descriptors.
pub struct Mesh2D {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl Mesh2D {
    pub unsafe fn new(
        ctx: &Context,
        command_pool: vk::CommandPool,
        vertices: &[Vertex2D],
        indices: &[u32],
    ) -> Result<Self> {
        let vertex_buffer = create_device_local_buffer(
            ctx,
            command_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
        )?;

        let index_buffer = create_device_local_buffer(
            ctx,
            command_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            indices,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub unsafe fn quad(
        ctx: &Context,
        command_pool: vk::CommandPool,
        position: Vec2,
        size: Vec2,
        color: Vec3,
    ) -> Result<Self> {
        let (vertices, indices) = quad_geometry(position, size, color);
        Self::new(ctx, command_pool, &vertices, &indices)
    }

    pub unsafe fn draw(&self, ctx: &Context, command_buffer: vk::CommandBuffer) {
        self.vertex_buffer.bind_as_vertex_buffer(ctx, command_buffer);
        self.index_buffer.bind_as_index_buffer(ctx, command_buffer);
        ctx.device.cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        self.vertex_buffer.destroy(ctx);
        self.index_buffer.destroy(ctx);
    }
}

/// A 3D mesh: geometry buffers, a model matrix, and its own
/// textured material descriptors, so each mesh can carry its
/// own texture maps.
pub struct Mesh3D {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    pub descriptors: MaterialDescriptors,
    pub model: Mat4,
}

impl Mesh3D {
    pub unsafe fn new(
        ctx: &Context,
        command_pool: vk::CommandPool,
        layouts: &DescriptorLayouts,
        sampler: vk::Sampler,
        defaults: DefaultViews,
        vertices: &[Vertex3D],
        indices: &[u32],
    ) -> Result<Self> {
        let vertex_buffer = create_device_local_buffer(
            ctx,
            command_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
        )?;

        let index_buffer = create_device_local_buffer(
            ctx,
            command_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            indices,
        )?;

        let descriptors = MaterialDescriptors::create(
            ctx,
            layouts,
            MaterialKind::Textured,
            sampler,
            defaults,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            descriptors,
            model: Mat4::IDENTITY,
        })
    }

    pub unsafe fn cube(
        ctx: &Context,
        command_pool: vk::CommandPool,
        layouts: &DescriptorLayouts,
        sampler: vk::Sampler,
        defaults: DefaultViews,
        size: f32,
    ) -> Result<Self> {
        let (vertices, indices) = cube_geometry(size);
        Self::new(ctx, command_pool, layouts, sampler, defaults, &vertices, &indices)
    }

    pub unsafe fn from_obj(
        ctx: &Context,
        command_pool: vk::CommandPool,
        layouts: &DescriptorLayouts,
        sampler: vk::Sampler,
        defaults: DefaultViews,
        path: &Path,
    ) -> Result<Self> {
        let (vertices, indices) = load_obj(path)?;
        Self::new(ctx, command_pool, layouts, sampler, defaults, &vertices, &indices)
    }

    /// Rebinds one of the mesh's texture slots. The descriptor
    /// sets are rewritten in place for every frame, so the
    /// device must be idle; the scene wraps this call in a
    /// device wait.
    pub unsafe fn set_texture(
        &self,
        ctx: &Context,
        slot: TextureSlot,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) {
        self.descriptors.set_texture(ctx, slot, sampler, view);
    }

    pub unsafe fn draw(
        &self,
        ctx: &Context,
        command_buffer: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        frame: usize,
    ) {
        self.descriptors.bind(ctx, command_buffer, pipeline_layout, frame);
        self.vertex_buffer.bind_as_vertex_buffer(ctx, command_buffer);
        self.index_buffer.bind_as_index_buffer(ctx, command_buffer);
        ctx.device.cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        self.descriptors.destroy(ctx);
        self.vertex_buffer.destroy(ctx);
        self.index_buffer.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    #[test]
    fn quad_is_six_vertices_six_indices() {
        let (vertices, indices) = quad_geometry(
            vec2(-0.5, -0.5),
            vec2(1.0, 1.0),
            vec3(1.0, 0.0, 0.0),
        );

        assert_eq!(vertices.len(), 6);
        assert_eq!(indices, (0..6).collect::<Vec<u32>>());

        // Both triangles span the full quad.
        let max = vertices
            .iter()
            .map(|v| v.position)
            .fold(vec2(f32::MIN, f32::MIN), Vec2::max);
        assert_eq!(max, vec2(0.5, 0.5));
    }

    #[test]
    fn cube_is_thirty_six_vertices() {
        let (vertices, indices) = cube_geometry(2.0);

        assert_eq!(vertices.len(), 36);
        assert_eq!(indices, (0..36).collect::<Vec<u32>>());

        // Scaling by the edge length puts corners at +-1.
        let max = vertices
            .iter()
            .map(|v| v.position.max_element())
            .fold(f32::MIN, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn quad_color_is_uniform() {
        let color = vec3(0.1, 0.2, 0.3);
        let (vertices, _) = quad_geometry(vec2(0.0, 0.0), vec2(1.0, 2.0), color);
        assert!(vertices.iter().all(|v| v.color == color));
    }
}

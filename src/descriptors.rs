use std::ptr::copy_nonoverlapping as memcpy;

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use glam::Mat4;

use crate::{
    buffers::GpuBuffer,
    context::Context,
    renderer::MAX_FRAMES_IN_FLIGHT,
};

/// The per-object uniform data read by the vertex shaders: the
/// model, view and projection matrices.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

/// The two material families the renderer draws. Untextured
/// materials (the 2D overlay meshes) only read the uniform
/// buffer; textured materials (the 3D meshes) additionally
/// sample up to four texture maps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaterialKind {
    Untextured,
    Textured,
}

impl MaterialKind {
    /// The number of combined image sampler bindings of the
    /// material's descriptor set (bindings 1 through 4 for
    /// textured materials).
    pub fn sampler_count(self) -> u32 {
        match self {
            MaterialKind::Untextured => 0,
            MaterialKind::Textured => 4,
        }
    }
}

/// The texture map slots of a textured material. Each slot maps
/// to a fixed descriptor binding; slots without an asset keep
/// the default texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureSlot {
    Albedo,
    Normal,
    Gloss,
    Specular,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 4] = [
        TextureSlot::Albedo,
        TextureSlot::Normal,
        TextureSlot::Gloss,
        TextureSlot::Specular,
    ];

    pub fn binding(self) -> u32 {
        match self {
            TextureSlot::Albedo => 1,
            TextureSlot::Normal => 2,
            TextureSlot::Gloss => 3,
            TextureSlot::Specular => 4,
        }
    }
}

/// The image views bound to texture slots no asset fills. The
/// white pixel is the identity for the color-like maps (albedo,
/// gloss, specular), but not for the normal map, whose neutral
/// value is the flat +Z normal; that slot gets its own default.
#[derive(Copy, Clone, Debug)]
pub struct DefaultViews {
    pub base: vk::ImageView,
    pub flat_normal: vk::ImageView,
}

impl DefaultViews {
    pub fn for_slot(&self, slot: TextureSlot) -> vk::ImageView {
        match slot {
            TextureSlot::Normal => self.flat_normal,
            _ => self.base,
        }
    }
}

/// The descriptor set layouts for both material kinds, created
/// once and shared: pipelines reference them in their layouts,
/// and every material's descriptor sets are allocated against
/// them.
pub struct DescriptorLayouts {
    pub untextured: vk::DescriptorSetLayout,
    pub textured: vk::DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub unsafe fn create(ctx: &Context) -> Result<Self> {
        // Binding 0 is the uniform buffer, read by the vertex
        // shader, in both layouts.
        let ubo_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build();

        let bindings = &[ubo_binding];
        let info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(bindings);

        let untextured = ctx.device.create_descriptor_set_layout(&info, None)?;

        // The textured layout adds the four sampler bindings
        // for the fragment shader.
        let mut bindings = vec![ubo_binding];
        for binding in 1..=MaterialKind::Textured.sampler_count() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                    .build(),
            );
        }

        let info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings);

        let textured = ctx.device.create_descriptor_set_layout(&info, None)?;

        Ok(Self { untextured, textured })
    }

    pub fn layout(&self, kind: MaterialKind) -> vk::DescriptorSetLayout {
        match kind {
            MaterialKind::Untextured => self.untextured,
            MaterialKind::Textured => self.textured,
        }
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        ctx.device.destroy_descriptor_set_layout(self.untextured, None);
        ctx.device.destroy_descriptor_set_layout(self.textured, None);
    }
}

/// The descriptor pool sizes for one material of the given
/// kind: one uniform buffer per frame in flight, plus the
/// kind's samplers per frame in flight.
pub fn pool_sizes(kind: MaterialKind) -> Vec<vk::DescriptorPoolSize> {
    let frames = MAX_FRAMES_IN_FLIGHT as u32;

    let mut sizes = vec![
        vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(frames)
            .build(),
    ];

    if kind.sampler_count() > 0 {
        sizes.push(
            vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(kind.sampler_count() * frames)
                .build(),
        );
    }

    sizes
}

/// The descriptor state of one material: a pool, one descriptor
/// set per frame in flight, and the per-frame uniform buffers
/// backing binding 0. The uniform buffers stay mapped for their
/// whole lifetime, so updating them each frame is a plain
/// memory write.
pub struct MaterialDescriptors {
    pub kind: MaterialKind,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    uniform_buffers: Vec<GpuBuffer>,
    mapped: Vec<*mut UniformBufferObject>,
}

impl MaterialDescriptors {
    /// Creates the pool, buffers and sets. Textured materials
    /// have every sampler binding pointed at its slot's default
    /// view initially; the uniform binding is written for all
    /// frames.
    pub unsafe fn create(
        ctx: &Context,
        layouts: &DescriptorLayouts,
        kind: MaterialKind,
        sampler: vk::Sampler,
        defaults: DefaultViews,
    ) -> Result<Self> {
        let sizes = pool_sizes(kind);
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(MAX_FRAMES_IN_FLIGHT as u32);

        let pool = ctx.device.create_descriptor_pool(&info, None)?;

        let set_layouts = vec![layouts.layout(kind); MAX_FRAMES_IN_FLIGHT];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);

        let sets = ctx.device.allocate_descriptor_sets(&info)?;

        // One uniform buffer per frame in flight, so that the
        // CPU can write the next frame's matrices while the GPU
        // still reads the previous frame's.
        let mut uniform_buffers = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let mut mapped = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let mut buffer = GpuBuffer::new(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            );
            buffer.allocate(ctx, size)?;

            let pointer = ctx.device.map_memory(
                buffer.memory,
                0,
                size,
                vk::MemoryMapFlags::empty(),
            )?;

            mapped.push(pointer.cast());
            uniform_buffers.push(buffer);
        }

        let descriptors = Self {
            kind,
            pool,
            sets,
            uniform_buffers,
            mapped,
        };

        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            descriptors.write_uniform_binding(ctx, frame);
        }

        if kind == MaterialKind::Textured {
            for slot in TextureSlot::ALL {
                descriptors.set_texture(ctx, slot, sampler, defaults.for_slot(slot));
            }
        }

        Ok(descriptors)
    }

    unsafe fn write_uniform_binding(&self, ctx: &Context, frame: usize) {
        let info = vk::DescriptorBufferInfo::builder()
            .buffer(self.uniform_buffers[frame].buffer)
            .offset(0)
            .range(std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize);

        let buffer_info = &[info];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.sets[frame])
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(buffer_info);

        ctx.device.update_descriptor_sets(&[*write], &[] as &[vk::CopyDescriptorSet]);
    }

    /// Points a texture slot's binding at a new image view, in
    /// place, for every frame's set. The caller must make sure
    /// no frame referencing the old view is in flight (the
    /// renderer waits the device idle around rebinding).
    pub unsafe fn set_texture(
        &self,
        ctx: &Context,
        slot: TextureSlot,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) {
        debug_assert_eq!(self.kind, MaterialKind::Textured);

        let info = vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(view)
            .sampler(sampler);

        let image_info = &[info];
        let writes = self
            .sets
            .iter()
            .map(|&set| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(slot.binding())
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(image_info)
                    .build()
            })
            .collect::<Vec<_>>();

        ctx.device.update_descriptor_sets(&writes, &[] as &[vk::CopyDescriptorSet]);
    }

    /// Writes the frame's uniform buffer through its persistent
    /// mapping.
    pub fn update_uniforms(&self, frame: usize, ubo: &UniformBufferObject) {
        unsafe {
            memcpy(ubo, self.mapped[frame], 1);
        }
    }

    pub unsafe fn bind(
        &self,
        ctx: &Context,
        command_buffer: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        frame: usize,
    ) {
        ctx.device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline_layout,
            0,
            &[self.sets[frame]],
            &[],
        );
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        for buffer in &mut self.uniform_buffers {
            ctx.device.unmap_memory(buffer.memory);
            buffer.destroy(ctx);
        }
        self.mapped.clear();

        // Destroying the pool frees the sets allocated from it.
        ctx.device.destroy_descriptor_pool(self.pool, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_buffer_object_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 192);
    }

    #[test]
    fn texture_slots_map_to_bindings_one_through_four() {
        assert_eq!(TextureSlot::Albedo.binding(), 1);
        assert_eq!(TextureSlot::Normal.binding(), 2);
        assert_eq!(TextureSlot::Gloss.binding(), 3);
        assert_eq!(TextureSlot::Specular.binding(), 4);
    }

    #[test]
    fn untextured_pool_has_no_samplers() {
        let sizes = pool_sizes(MaterialKind::Untextured);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].type_, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, MAX_FRAMES_IN_FLIGHT as u32);
    }

    #[test]
    fn textured_pool_has_four_samplers_per_frame() {
        let sizes = pool_sizes(MaterialKind::Textured);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[1].type_, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 4 * MAX_FRAMES_IN_FLIGHT as u32);
    }

    #[test]
    fn only_the_normal_slot_gets_the_flat_normal_default() {
        use vulkanalia::vk::Handle;

        // Handles are opaque, but distinct dummies are enough
        // to check the routing.
        let defaults = DefaultViews {
            base: vk::ImageView::null(),
            flat_normal: vk::ImageView::from_raw(1),
        };

        for slot in TextureSlot::ALL {
            let expected = if slot == TextureSlot::Normal {
                defaults.flat_normal
            } else {
                defaults.base
            };
            assert_eq!(defaults.for_slot(slot), expected);
        }
    }

    #[test]
    fn sampler_counts_per_kind() {
        assert_eq!(MaterialKind::Untextured.sampler_count(), 0);
        assert_eq!(MaterialKind::Textured.sampler_count(), 4);
    }
}

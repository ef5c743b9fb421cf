use std::path::Path;

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use glam::Vec3;
use log::*;

use crate::{
    context::Context,
    descriptors::{DescriptorLayouts, MaterialKind},
    shaders::load_shader_module,
    vertex::{Vertex2D, Vertex3D},
};

/// The shading model applied by the 3D fragment shader,
/// selected at runtime through a push constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ShadingMode {
    Lambert = 0,
    Normal = 1,
    Specular = 2,
    Combined = 3,
}

/// The push constant block shared by both pipelines: the camera
/// position for specular shading, and the shading mode. The
/// std430 rules place the i32 at byte offset 16, after the
/// vec3 and its padding.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PushConstants {
    pub camera_origin: Vec3,
    _padding: f32,
    pub shading_mode: i32,
}

impl PushConstants {
    pub fn new(camera_origin: Vec3, shading_mode: ShadingMode) -> Self {
        Self {
            camera_origin,
            _padding: 0.0,
            shading_mode: shading_mode as i32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                (self as *const Self).cast(),
                std::mem::size_of::<Self>(),
            )
        }
    }
}

/// A graphics pipeline and its layout. Two are built, one per
/// material kind: the 2D pipeline draws the overlay without
/// depth testing, the 3D pipeline draws the scene with it.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Pipeline {
    pub unsafe fn destroy(&mut self, ctx: &Context) {
        ctx.device.destroy_pipeline(self.pipeline, None);
        ctx.device.destroy_pipeline_layout(self.layout, None);
    }
}

pub unsafe fn create_2d_pipeline(
    ctx: &Context,
    render_pass: vk::RenderPass,
    layouts: &DescriptorLayouts,
) -> Result<Pipeline> {
    create_pipeline(
        ctx,
        render_pass,
        layouts.layout(MaterialKind::Untextured),
        Path::new("shaders/2d.vert.spv"),
        Path::new("shaders/2d.frag.spv"),
        Vertex2D::binding_description(),
        &Vertex2D::attribute_descriptions(),
        false,
    )
}

pub unsafe fn create_3d_pipeline(
    ctx: &Context,
    render_pass: vk::RenderPass,
    layouts: &DescriptorLayouts,
) -> Result<Pipeline> {
    create_pipeline(
        ctx,
        render_pass,
        layouts.layout(MaterialKind::Textured),
        Path::new("shaders/3d.vert.spv"),
        Path::new("shaders/3d.frag.spv"),
        Vertex3D::binding_description(),
        &Vertex3D::attribute_descriptions(),
        true,
    )
}

unsafe fn create_pipeline(
    ctx: &Context,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    vertex_shader: &Path,
    fragment_shader: &Path,
    binding: vk::VertexInputBindingDescription,
    attributes: &[vk::VertexInputAttributeDescription],
    depth_test: bool,
) -> Result<Pipeline> {
    // The programmable stages: a vertex and a fragment shader,
    // entering at main. The modules are only needed during
    // pipeline creation and destroyed right after.
    let vert = load_shader_module(ctx, vertex_shader)?;
    let frag = load_shader_module(ctx, fragment_shader)?;

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert)
        .name(b"main\0");

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag)
        .name(b"main\0");

    // Vertex input: how vertex data is pulled from the bound
    // buffer, per the vertex type's descriptions.
    let binding_descriptions = &[binding];
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(attributes);

    // Input assembly: vertices make up a plain triangle list.
    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic state, set at record
    // time, so the pipeline survives window resizes; only
    // their counts are fixed here.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
        .dynamic_states(dynamic_states);

    // Rasterization: fill triangles, cull back faces, with
    // counter-clockwise front faces.
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    // Depth testing is what differs between the two pipelines:
    // the 3D scene needs it, the 2D overlay (drawn first, under
    // everything) does not.
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(depth_test)
        .depth_write_enable(depth_test)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // No blending; the fragment color overwrites the
    // attachment.
    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(false);

    let attachments = &[attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(attachments);

    // The pipeline layout: one descriptor set, and the push
    // constant block read by the fragment shader.
    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(std::mem::size_of::<PushConstants>() as u32);

    let set_layouts = &[set_layout];
    let push_constant_ranges = &[push_constant_range];
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    let layout = ctx.device.create_pipeline_layout(&layout_info, None)?;

    let stages = &[vert_stage, frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .dynamic_state(&dynamic_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipeline = ctx.device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[*info], None)?
        .0[0];

    ctx.device.destroy_shader_module(vert, None);
    ctx.device.destroy_shader_module(frag, None);

    info!("Pipeline created ({}).", vertex_shader.display());
    Ok(Pipeline { pipeline, layout })
}

/// Records the push constants and the dynamic viewport and
/// scissor for the whole frame.
pub unsafe fn set_frame_state(
    ctx: &Context,
    command_buffer: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    constants: &PushConstants,
) {
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    ctx.device.cmd_set_viewport(command_buffer, 0, &[*viewport]);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(extent);

    ctx.device.cmd_set_scissor(command_buffer, 0, &[*scissor]);

    ctx.device.cmd_push_constants(
        command_buffer,
        layout,
        vk::ShaderStageFlags::FRAGMENT,
        0,
        constants.as_bytes(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    #[test]
    fn push_constants_are_twenty_bytes() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 20);
    }

    #[test]
    fn shading_mode_sits_at_byte_sixteen() {
        let constants = PushConstants::new(vec3(1.0, 2.0, 3.0), ShadingMode::Specular);
        let bytes = constants.as_bytes();

        let mode = i32::from_ne_bytes(bytes[16..20].try_into().unwrap());
        assert_eq!(mode, ShadingMode::Specular as i32);

        let x = f32::from_ne_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(x, 1.0);

        // Bytes 12..16 are the vec3's padding, always zero; a
        // shader reading the mode there would see Lambert no
        // matter what was selected, so the fragment shaders
        // declare the mode at offset 16 explicitly.
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn shading_mode_values() {
        assert_eq!(ShadingMode::Lambert as i32, 0);
        assert_eq!(ShadingMode::Normal as i32, 1);
        assert_eq!(ShadingMode::Specular as i32, 2);
        assert_eq!(ShadingMode::Combined as i32, 3);
    }
}

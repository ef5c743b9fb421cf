use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::*;

use crate::{
    buffers::{self, GpuBuffer},
    context::Context,
    descriptors::DefaultViews,
    image::{create_image, create_image_view, copy_buffer_to_image, transition_image_layout},
};

/// The pixel of the default base texture: opaque white, the
/// identity for the color-like maps.
pub const WHITE_PIXEL: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

/// The pixel of the default normal map: the flat +Z normal,
/// which decodes to (0, 0, 1) and leaves the vertex normals
/// untouched.
pub const FLAT_NORMAL_PIXEL: [u8; 4] = [0x80, 0x80, 0xff, 0xff];

/// A sampled texture: the image, its memory, and a view over
/// it. Samplers are not part of the texture, since a single
/// shared sampler serves all of them.
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl Texture {
    /// Creates a texture from raw RGBA8 pixel data, uploading
    /// through a staging buffer and transitioning the image
    /// into the shader-read layout. Color data gets an sRGB
    /// format; data textures like normal maps must use UNORM,
    /// or sampling would gamma-decode their values.
    pub unsafe fn from_pixels(
        ctx: &Context,
        command_pool: vk::CommandPool,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<Self> {
        if pixels.len() != (width as usize) * (height as usize) * 4 {
            return Err(anyhow!(
                "Pixel data of {} bytes does not match a {}x{} RGBA image.",
                pixels.len(), width, height
            ));
        }

        // The pixels are first copied into a host-visible
        // staging buffer...
        let mut staging = GpuBuffer::new(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        staging.allocate(ctx, pixels.len() as vk::DeviceSize)?;
        staging.upload(ctx, pixels)?;

        // ...then transferred into a device-local image.
        // Optimal tiling, since the shader never needs direct
        // access to the memory layout.
        let (image, memory) = create_image(
            ctx,
            width,
            height,
            format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        // The image starts in the UNDEFINED layout: transition
        // it to be a transfer destination, copy the staging
        // buffer in, and transition again so the fragment
        // shader can sample it.
        transition_image_layout(
            ctx,
            command_pool,
            image,
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        copy_buffer_to_image(ctx, command_pool, staging.buffer, image, width, height)?;

        transition_image_layout(
            ctx,
            command_pool,
            image,
            format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        // The transfers have been waited on, so the staging
        // buffer can go.
        staging.destroy(ctx);

        let view = create_image_view(ctx, image, format, vk::ImageAspectFlags::COLOR)?;

        Ok(Self { image, memory, view })
    }

    /// Creates a texture from a PNG file.
    pub unsafe fn from_file(
        ctx: &Context,
        command_pool: vk::CommandPool,
        path: &Path,
    ) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow!("Failed to open texture {}: {}", path.display(), e))?;

        let decoder = png::Decoder::new(file);
        let mut reader = decoder.read_info()?;

        let mut pixels = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut pixels)?;

        if info.color_type != png::ColorType::Rgba || info.bit_depth != png::BitDepth::Eight {
            return Err(anyhow!("Texture {} is not an 8-bit RGBA image.", path.display()));
        }

        // File textures are color data authored in sRGB space.
        let texture = Self::from_pixels(
            ctx,
            command_pool,
            &pixels[..info.buffer_size()],
            info.width,
            info.height,
            vk::Format::R8G8B8A8_SRGB,
        )?;
        info!("Texture {} loaded ({}x{}).", path.display(), info.width, info.height);

        Ok(texture)
    }

    pub unsafe fn destroy(&self, ctx: &Context) {
        ctx.device.destroy_image_view(self.view, None);
        ctx.device.destroy_image(self.image, None);
        ctx.device.free_memory(self.memory, None);
        buffers::note_free();
    }
}

/// Creates the sampler shared by all textures: linear
/// filtering, repeat addressing, and full anisotropy.
pub unsafe fn create_texture_sampler(ctx: &Context) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(16.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

    Ok(ctx.device.create_sampler(&info, None)?)
}

/// A path-keyed texture cache: each file is decoded and
/// uploaded once, and later requests for the same path share
/// the texture. Also owns the two default textures bound to
/// sampler slots that no asset fills.
pub struct TextureCache {
    textures: HashMap<PathBuf, Rc<Texture>>,
    default: Rc<Texture>,
    default_normal: Rc<Texture>,
}

impl TextureCache {
    pub unsafe fn create(ctx: &Context, command_pool: vk::CommandPool) -> Result<Self> {
        // The default base texture is a single opaque white
        // pixel: sampling it is the identity for the color-like
        // maps (albedo, gloss, specular), so materials without
        // a map in such a slot are unaffected by it. The normal
        // map slot instead defaults to the flat +Z normal, in
        // UNORM so sampling does not gamma-decode it.
        let default = Texture::from_pixels(
            ctx,
            command_pool,
            &WHITE_PIXEL,
            1,
            1,
            vk::Format::R8G8B8A8_SRGB,
        )?;

        let default_normal = Texture::from_pixels(
            ctx,
            command_pool,
            &FLAT_NORMAL_PIXEL,
            1,
            1,
            vk::Format::R8G8B8A8_UNORM,
        )?;

        Ok(Self {
            textures: HashMap::new(),
            default: Rc::new(default),
            default_normal: Rc::new(default_normal),
        })
    }

    /// The per-slot default views handed to textured materials.
    pub fn default_views(&self) -> DefaultViews {
        DefaultViews {
            base: self.default.view,
            flat_normal: self.default_normal.view,
        }
    }

    /// Returns the texture for `path`, loading it on the first
    /// request.
    pub unsafe fn load(
        &mut self,
        ctx: &Context,
        command_pool: vk::CommandPool,
        path: &Path,
    ) -> Result<Rc<Texture>> {
        if let Some(texture) = self.textures.get(path) {
            return Ok(texture.clone());
        }

        let texture = Rc::new(Texture::from_file(ctx, command_pool, path)?);
        self.textures.insert(path.to_path_buf(), texture.clone());

        Ok(texture)
    }

    /// Destroys every cached texture and the default textures.
    /// Callers must not hold on to texture references past this
    /// point.
    pub unsafe fn destroy(&mut self, ctx: &Context) {
        for (_, texture) in self.textures.drain() {
            texture.destroy(ctx);
        }

        self.default.destroy(ctx);
        self.default_normal.destroy(ctx);

        info!("Destroyed the texture cache.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Samplers map unorm bytes to [0, 1]; the shader then
    // remaps to [-1, 1] to recover the normal.
    fn decode_normal_channel(byte: u8) -> f32 {
        byte as f32 / 255.0 * 2.0 - 1.0
    }

    #[test]
    fn flat_normal_default_decodes_to_plus_z() {
        let [r, g, b, a] = FLAT_NORMAL_PIXEL;

        assert!(decode_normal_channel(r).abs() < 0.01);
        assert!(decode_normal_channel(g).abs() < 0.01);
        assert!((decode_normal_channel(b) - 1.0).abs() < 1e-6);
        assert_eq!(a, 0xff);
    }

    #[test]
    fn white_default_is_the_color_identity() {
        assert_eq!(WHITE_PIXEL, [0xff; 4]);
    }
}

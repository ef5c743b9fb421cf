use vulkanalia::{
    prelude::v1_0::*,
    vk::KhrSurfaceExtension,
    vk::KhrSwapchainExtension,
};
use anyhow::Result;
use log::*;

use crate::{context::Context, image::create_image_view};

/// The swapchain capabilities of a device: basic surface
/// capabilities (min/max number of images, min/max size of
/// images), surface formats (pixel format, color space), and
/// the available presentation modes.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(ctx: &Context) -> Result<Self> {
        Ok(Self {
            capabilities: ctx.instance.get_physical_device_surface_capabilities_khr(
                ctx.physical_device,
                ctx.surface,
            )?,
            formats: ctx.instance.get_physical_device_surface_formats_khr(
                ctx.physical_device,
                ctx.surface,
            )?,
            present_modes: ctx.instance.get_physical_device_surface_present_modes_khr(
                ctx.physical_device,
                ctx.surface,
            )?,
        })
    }
}

/// Chooses the surface format: B8G8R8A8 sRGB if the surface
/// offers it, the first advertised format otherwise.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .cloned()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

/// Chooses the presentation mode: MAILBOX (triple buffering,
/// low latency without tearing) if available, otherwise FIFO,
/// the only mode guaranteed to exist.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|&m| m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Chooses the swapchain extent. Most window systems report
/// the exact surface size in current_extent; the u32::MAX
/// sentinel value means the window manager leaves the choice to
/// us, in which case the framebuffer size is clamped into the
/// supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D::builder()
            .width(width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ))
            .height(height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ))
            .build()
    }
}

/// Chooses the number of swapchain images: one more than the
/// minimum, so the application is not stalled waiting on the
/// driver, capped at the maximum (0 meaning "no maximum").
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

/// The swapchain and its images: the infrastructure of
/// buffering and presentation, owning the queue of images to
/// present to the window surface. Recreated whenever the
/// surface changes (for example, on window resize).
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub unsafe fn create(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let support = SwapchainSupport::get(ctx)?;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        // If the graphics and presentation families differ, the
        // swapchain images have to be shared between them
        // (CONCURRENT mode); otherwise they can stay owned by
        // the one family (EXCLUSIVE mode), which performs best.
        let indices = ctx.indices;
        let mut queue_family_indices = vec![];
        let sharing_mode = if indices.graphics != indices.present {
            queue_family_indices.push(indices.graphics);
            queue_family_indices.push(indices.present);
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        // Images are rendered directly as color attachments,
        // with a single layer each (more would be for
        // stereoscopic rendering). The current transform keeps
        // the images unrotated and unflipped; the OPAQUE
        // composite alpha ignores blending with other windows;
        // and clipping discards pixels hidden by other windows.
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = ctx.device.create_swapchain_khr(&info, None)?;
        let images = ctx.device.get_swapchain_images_khr(swapchain)?;

        // One view per image, to use them as color targets.
        let views = images
            .iter()
            .map(|&i| create_image_view(ctx, i, surface_format.format, vk::ImageAspectFlags::COLOR))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Swapchain created ({} images, {}x{}).", images.len(), extent.width, extent.height);

        Ok(Self {
            swapchain,
            images,
            views,
            format: surface_format.format,
            extent,
        })
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        self.views
            .iter()
            .for_each(|&v| ctx.device.destroy_image_view(v, None));
        ctx.device.destroy_swapchain_khr(self.swapchain, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR::builder()
            .format(format)
            .color_space(color_space)
            .build()
    }

    #[test]
    fn preferred_surface_format_is_bgra_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR::builder()
            .current_extent(vk::Extent2D { width: 800, height: 600 })
            .build();

        let extent = choose_extent(&capabilities, 1024, 768);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_framebuffer_size_on_sentinel() {
        let capabilities = vk::SurfaceCapabilitiesKHR::builder()
            .current_extent(vk::Extent2D { width: u32::MAX, height: u32::MAX })
            .min_image_extent(vk::Extent2D { width: 200, height: 200 })
            .max_image_extent(vk::Extent2D { width: 1000, height: 1000 })
            .build();

        let extent = choose_extent(&capabilities, 1920, 100);
        assert_eq!((extent.width, extent.height), (1000, 200));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let capabilities = vk::SurfaceCapabilitiesKHR::builder()
            .min_image_count(2)
            .max_image_count(0)
            .build();
        assert_eq!(choose_image_count(&capabilities), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR::builder()
            .min_image_count(2)
            .max_image_count(2)
            .build();
        assert_eq!(choose_image_count(&capabilities), 2);
    }
}

//! Off-screen color targets, one per swapchain image, with a shared depth.

use ash::vk;

use super::device::Device;
use super::garbage::GpuGarbage;
use super::memory::{Attachment, ImageDesc};
use crate::error::RendererResult;
use crate::frame::PerImage;

/// Per-image color attachments plus one depth attachment, sized like the
/// swapchain. Color images start out in SHADER_READ_ONLY so they can be
/// sampled or read back before the first frame renders into them.
#[derive(Debug)]
pub struct OffscreenTarget {
    color: PerImage<Attachment>,
    depth: Attachment,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl OffscreenTarget {
    pub fn new(
        device: &Device,
        name: &str,
        extent: vk::Extent2D,
        image_count: usize,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> RendererResult<Self> {
        let depth = device.create_attachment(
            &format!("{name} depth"),
            &ImageDesc::new(
                extent,
                device.depth_format(),
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
            vk::ImageAspectFlags::DEPTH,
        )?;

        let mut color = Vec::with_capacity(image_count);
        for i in 0..image_count {
            let attachment = device
                .create_attachment(
                    &format!("{name} color {i}"),
                    &ImageDesc::new(extent, format, usage | vk::ImageUsageFlags::COLOR_ATTACHMENT),
                    vk::ImageAspectFlags::COLOR,
                )
                .and_then(|attachment| {
                    match device.transition_image_layout(
                        attachment.image.raw(),
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::ImageAspectFlags::COLOR,
                    ) {
                        Ok(()) => Ok(attachment),
                        Err(e) => {
                            device.destroy_attachment(attachment);
                            Err(e)
                        }
                    }
                });
            match attachment {
                Ok(attachment) => color.push(attachment),
                Err(e) => {
                    for attachment in color {
                        device.destroy_attachment(attachment);
                    }
                    device.destroy_attachment(depth);
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Created {name} target: {image_count} x {}x{} {format:?}",
            extent.width,
            extent.height
        );
        Ok(Self {
            color: PerImage::new(color),
            depth,
            format,
            extent,
        })
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn color(&self) -> &PerImage<Attachment> {
        &self.color
    }

    pub fn color_views(&self) -> PerImage<vk::ImageView> {
        self.color.iter().map(|attachment| attachment.view).collect()
    }

    /// `[color, depth]` for each image, matching a single-sampled scene pass.
    pub fn framebuffer_views(&self) -> PerImage<Vec<vk::ImageView>> {
        self.color
            .iter()
            .map(|attachment| vec![attachment.view, self.depth.view])
            .collect()
    }

    pub fn into_garbage(mut self) -> Vec<GpuGarbage> {
        let mut garbage: Vec<GpuGarbage> = self.color.drain().map(GpuGarbage::Attachment).collect();
        garbage.push(GpuGarbage::Attachment(self.depth));
        garbage
    }
}

//! GPU side of object picking: the integer target and its read-back.

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::device::{Device, ImageBarrier};
use super::garbage::GpuGarbage;
use super::render_pass::PICKING_FORMAT;
use super::target::OffscreenTarget;
use crate::error::{RendererError, RendererResult};
use crate::frame::{ImageIndex, PerImage};

/// Bytes of one `R32G32_UINT` texel.
const TEXEL_SIZE: vk::DeviceSize = 8;

/// Clear value of the picking target, which reads back as "no object".
pub fn picking_clear_color() -> vk::ClearColorValue {
    vk::ClearColorValue { uint32: [0; 4] }
}

/// One `R32G32_UINT` color image per swapchain image plus a depth image.
#[derive(Debug)]
pub struct PickingTarget {
    target: OffscreenTarget,
}

impl PickingTarget {
    pub fn new(device: &Device, extent: vk::Extent2D, image_count: usize) -> RendererResult<Self> {
        let target = OffscreenTarget::new(
            device,
            "picking",
            extent,
            image_count,
            PICKING_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED,
        )?;
        Ok(Self { target })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.target.extent()
    }

    pub fn framebuffer_views(&self) -> PerImage<Vec<vk::ImageView>> {
        self.target.framebuffer_views()
    }

    /// Copy the texel at (`x`, `y`) of `image` into host memory.
    ///
    /// Blocks on a one-shot submit. The frame that rendered `image` must have
    /// completed.
    pub fn read_texel(
        &self,
        device: &Device,
        image: ImageIndex,
        x: u32,
        y: u32,
    ) -> RendererResult<[u32; 2]> {
        let extent = self.target.extent();
        if x >= extent.width || y >= extent.height {
            return Err(RendererError::InvalidParameter(format!(
                "texel ({x}, {y}) outside picking target {}x{}",
                extent.width, extent.height
            )));
        }
        let color = self.target.color().get(image).ok_or_else(|| {
            RendererError::MissingResource(format!("picking target for {image}"))
        })?;
        let source = color.image.raw();

        let staging = device.create_buffer(
            "picking read-back",
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            TEXEL_SIZE,
            None,
        )?;

        let copied = device.begin_single_time_commands().and_then(|commands| {
            let cmd = commands.buffer();
            device.insert_image_memory_barrier(
                cmd,
                &ImageBarrier::transition(
                    source,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageAspectFlags::COLOR,
                ),
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D {
                    x: x as i32,
                    y: y as i32,
                    z: 0,
                })
                .image_extent(vk::Extent3D {
                    width: 1,
                    height: 1,
                    depth: 1,
                });
            unsafe {
                device.raw().cmd_copy_image_to_buffer(
                    cmd,
                    source,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    staging.raw(),
                    &[region],
                );
            }

            device.insert_image_memory_barrier(
                cmd,
                &ImageBarrier::transition(
                    source,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageAspectFlags::COLOR,
                ),
            );
            device.insert_host_read_barrier(cmd, &staging);
            commands.end()
        });

        let texel = copied.and_then(|()| {
            device.invalidate_buffer(&staging)?;
            let bytes = staging.mapped()?;
            bytes
                .get(..TEXEL_SIZE as usize)
                .map(bytemuck::pod_read_unaligned::<[u32; 2]>)
                .ok_or_else(|| RendererError::InvalidParameter("short picking read-back".into()))
        });
        device.destroy_buffer(staging);

        if let Ok(texel) = texel {
            log::debug!("Picking texel ({x}, {y}) of {image}: {texel:?}");
        }
        texel
    }

    pub fn into_garbage(self) -> Vec<GpuGarbage> {
        self.target.into_garbage()
    }
}

//! GPU objects waiting for the frames that used them to finish.
//!
//! Objects replaced or removed between frames may still be referenced by the
//! command buffers of the last submitted frame. They are wrapped in
//! [`GpuGarbage`] and handed to a [`crate::retire::RetirementQueue`] keyed by
//! that frame's slot, then destroyed after the slot's fence is waited on.

use ash::vk;

use super::device::Device;
use super::memory::{Attachment, GpuBuffer, GpuImage};

/// A GPU object pending destruction.
#[derive(Debug)]
pub enum GpuGarbage {
    Buffer(GpuBuffer),
    Image(GpuImage),
    Attachment(Attachment),
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Framebuffer(vk::Framebuffer),
    RenderPass(vk::RenderPass),
    /// Destroying the pool frees every command buffer allocated from it.
    CommandPool(vk::CommandPool),
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    },
    DescriptorSets {
        pool: vk::DescriptorPool,
        sets: Vec<vk::DescriptorSet>,
    },
}

impl GpuGarbage {
    /// Destroy the object. The GPU must be done with it.
    pub fn destroy(self, device: &Device) {
        let raw = device.raw();
        match self {
            GpuGarbage::Buffer(buffer) => device.destroy_buffer(buffer),
            GpuGarbage::Image(image) => device.destroy_image(image),
            GpuGarbage::Attachment(attachment) => device.destroy_attachment(attachment),
            GpuGarbage::ImageView(view) => unsafe { raw.destroy_image_view(view, None) },
            GpuGarbage::Sampler(sampler) => unsafe { raw.destroy_sampler(sampler, None) },
            GpuGarbage::Framebuffer(framebuffer) => unsafe {
                raw.destroy_framebuffer(framebuffer, None)
            },
            GpuGarbage::RenderPass(render_pass) => unsafe {
                raw.destroy_render_pass(render_pass, None)
            },
            GpuGarbage::CommandPool(pool) => unsafe { raw.destroy_command_pool(pool, None) },
            GpuGarbage::Pipeline { pipeline, layout } => unsafe {
                raw.destroy_pipeline(pipeline, None);
                raw.destroy_pipeline_layout(layout, None);
            },
            GpuGarbage::DescriptorSets { pool, sets } => {
                if let Err(e) = unsafe { raw.free_descriptor_sets(pool, &sets) } {
                    log::warn!("Failed to free {} descriptor sets: {e:?}", sets.len());
                }
            }
        }
    }
}

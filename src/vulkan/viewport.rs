//! Off-screen scene target displayed inside a UI panel.

use ash::vk;

use super::device::{Device, SamplerDesc};
use super::garbage::GpuGarbage;
use super::render_pass::VIEWPORT_FORMAT;
use super::target::OffscreenTarget;
use crate::error::RendererResult;
use crate::frame::PerImage;

/// Scene color per swapchain image, sampled by the UI after the viewport
/// pass. The sampler outlives target rebuilds.
#[derive(Debug)]
pub struct ViewportTarget {
    target: OffscreenTarget,
    sampler: vk::Sampler,
}

impl ViewportTarget {
    pub fn new(device: &Device, extent: vk::Extent2D, image_count: usize) -> RendererResult<Self> {
        let sampler = device.create_sampler(&SamplerDesc {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..SamplerDesc::default()
        })?;
        match create_target(device, extent, image_count) {
            Ok(target) => Ok(Self { target, sampler }),
            Err(e) => {
                unsafe { device.raw().destroy_sampler(sampler, None) };
                Err(e)
            }
        }
    }

    /// Replace the images for a new swapchain size, returning the old ones.
    pub fn rebuild(
        &mut self,
        device: &Device,
        extent: vk::Extent2D,
        image_count: usize,
    ) -> RendererResult<Vec<GpuGarbage>> {
        let target = create_target(device, extent, image_count)?;
        Ok(std::mem::replace(&mut self.target, target).into_garbage())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.target.extent()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn views(&self) -> PerImage<vk::ImageView> {
        self.target.color_views()
    }

    pub fn framebuffer_views(&self) -> PerImage<Vec<vk::ImageView>> {
        self.target.framebuffer_views()
    }

    pub fn into_garbage(self) -> Vec<GpuGarbage> {
        let mut garbage = self.target.into_garbage();
        garbage.push(GpuGarbage::Sampler(self.sampler));
        garbage
    }
}

fn create_target(
    device: &Device,
    extent: vk::Extent2D,
    image_count: usize,
) -> RendererResult<OffscreenTarget> {
    OffscreenTarget::new(
        device,
        "viewport",
        extent,
        image_count,
        VIEWPORT_FORMAT,
        vk::ImageUsageFlags::SAMPLED,
    )
}

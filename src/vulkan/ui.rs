//! Descriptor resources for images the UI samples.

use ash::vk;

use super::device::Device;
use super::garbage::GpuGarbage;
use super::pipeline::{allocate_descriptor_sets, create_set_layout};
use crate::error::{creation_error, RendererResult};

/// Upper bound on user textures the UI can show at once.
const MAX_UI_TEXTURES: u32 = 64;

/// Combined image sampler sets in the layout egui-ash-renderer binds for user
/// textures.
pub struct UiPass {
    descriptor_pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
}

impl UiPass {
    pub fn new(device: &Device) -> RendererResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_UI_TEXTURES,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_UI_TEXTURES)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { device.raw().create_descriptor_pool(&pool_info, None) }
            .map_err(creation_error("UI descriptor pool"))?;

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let set_layout = match create_set_layout(device, &bindings) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.raw().destroy_descriptor_pool(descriptor_pool, None) };
                return Err(e);
            }
        };

        Ok(Self {
            descriptor_pool,
            set_layout,
        })
    }

    /// Allocate a set sampling `view` (in SHADER_READ_ONLY) through `sampler`.
    pub fn add_texture(
        &self,
        device: &Device,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) -> RendererResult<vk::DescriptorSet> {
        let set = allocate_descriptor_sets(device, self.descriptor_pool, self.set_layout, 1)?[0];
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { device.raw().update_descriptor_sets(&[write], &[]) };
        Ok(set)
    }

    /// Hand sets from [`Self::add_texture`] back for deferred freeing.
    pub fn free_textures(&self, sets: Vec<vk::DescriptorSet>) -> GpuGarbage {
        GpuGarbage::DescriptorSets {
            pool: self.descriptor_pool,
            sets,
        }
    }

    /// Frees every set still allocated from the pool.
    pub fn destroy(&self, device: &Device) {
        unsafe {
            device
                .raw()
                .destroy_descriptor_pool(self.descriptor_pool, None);
            device
                .raw()
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

//! Sampled RGBA8 textures and the handle registry that owns them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::device::{Device, ImageBarrier, SamplerDesc};
use super::garbage::GpuGarbage;
use super::memory::{GpuImage, ImageDesc};
use super::pipeline::{allocate_descriptor_sets, write_texture_set};
use crate::error::{RendererError, RendererResult};

/// Format of every uploaded texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Byte length of a tightly packed RGBA8 image, `None` on overflow or a zero
/// dimension.
pub fn rgba8_len(width: u32, height: u32) -> Option<usize> {
    if width == 0 || height == 0 {
        return None;
    }
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(4)
}

/// An uploaded image with its view, sampler and set-1 descriptor set.
#[derive(Debug)]
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    descriptor_set: vk::DescriptorSet,
    descriptor_pool: vk::DescriptorPool,
}

impl Texture {
    /// Upload `pixels` through a staging buffer and leave the image in
    /// SHADER_READ_ONLY. Blocks until the copy finished.
    pub fn from_rgba8(
        device: &Device,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
        descriptor_pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RendererResult<Self> {
        let expected = rgba8_len(width, height).ok_or_else(|| {
            RendererError::InvalidParameter(format!("texture '{name}' is {width}x{height}"))
        })?;
        if pixels.len() != expected {
            return Err(RendererError::InvalidParameter(format!(
                "texture '{name}' has {} bytes, {width}x{height} RGBA8 needs {expected}",
                pixels.len()
            )));
        }

        let extent = vk::Extent2D { width, height };
        let image = device.create_image(
            name,
            &ImageDesc::new(
                extent,
                TEXTURE_FORMAT,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            ),
        )?;

        if let Err(e) = upload(device, &image, pixels) {
            device.destroy_image(image);
            return Err(e);
        }

        let mut garbage = Vec::new();
        let result = (|| -> RendererResult<_> {
            let view = device.create_image_view(
                image.raw(),
                TEXTURE_FORMAT,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            garbage.push(GpuGarbage::ImageView(view));
            let sampler = device.create_sampler(&SamplerDesc::default())?;
            garbage.push(GpuGarbage::Sampler(sampler));
            let sets = allocate_descriptor_sets(device, descriptor_pool, layout, 1)?;
            write_texture_set(device, sets[0], view, sampler);
            Ok((view, sampler, sets[0]))
        })();

        match result {
            Ok((view, sampler, descriptor_set)) => {
                log::debug!("Uploaded texture '{name}' ({width}x{height})");
                Ok(Self {
                    image,
                    view,
                    sampler,
                    descriptor_set,
                    descriptor_pool,
                })
            }
            Err(e) => {
                for item in garbage {
                    item.destroy(device);
                }
                device.destroy_image(image);
                Err(e)
            }
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Set bound at set 1 by textured pipelines.
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    pub fn into_garbage(self) -> Vec<GpuGarbage> {
        vec![
            GpuGarbage::DescriptorSets {
                pool: self.descriptor_pool,
                sets: vec![self.descriptor_set],
            },
            GpuGarbage::Sampler(self.sampler),
            GpuGarbage::ImageView(self.view),
            GpuGarbage::Image(self.image),
        ]
    }
}

fn upload(device: &Device, image: &GpuImage, pixels: &[u8]) -> RendererResult<()> {
    let staging = device.create_buffer(
        "texture staging",
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        pixels.len() as vk::DeviceSize,
        Some(pixels),
    )?;

    let result = device.begin_single_time_commands().and_then(|commands| {
        let cmd = commands.buffer();
        device.insert_image_memory_barrier(
            cmd,
            &ImageBarrier::transition(
                image.raw(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageAspectFlags::COLOR,
            ),
        );

        let extent = image.extent();
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            device.raw().cmd_copy_buffer_to_image(
                cmd,
                staging.raw(),
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        device.insert_image_memory_barrier(
            cmd,
            &ImageBarrier::transition(
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageAspectFlags::COLOR,
            ),
        );
        commands.end()
    });

    device.destroy_buffer(staging);
    result
}

/// Identifier of a registered texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u32);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture #{}", self.0)
    }
}

/// Textures keyed by the handle returned at registration.
///
/// Handles are never reused, so a stale handle misses instead of aliasing a
/// newer texture.
#[derive(Debug)]
pub struct TextureRegistry<T = Texture> {
    textures: BTreeMap<TextureHandle, Arc<T>>,
    next: u32,
}

impl<T> TextureRegistry<T> {
    pub fn new() -> Self {
        Self {
            textures: BTreeMap::new(),
            next: 0,
        }
    }

    pub fn insert(&mut self, texture: T) -> TextureHandle {
        let handle = TextureHandle(self.next);
        self.next += 1;
        self.textures.insert(handle, Arc::new(texture));
        handle
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&Arc<T>> {
        self.textures.get(&handle)
    }

    pub fn require(&self, handle: TextureHandle) -> RendererResult<&Arc<T>> {
        self.get(handle)
            .ok_or_else(|| RendererError::MissingResource(handle.to_string()))
    }

    pub fn contains(&self, handle: TextureHandle) -> bool {
        self.textures.contains_key(&handle)
    }

    pub fn remove(&mut self, handle: TextureHandle) -> Option<Arc<T>> {
        self.textures.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (TextureHandle, Arc<T>)> {
        std::mem::take(&mut self.textures).into_iter()
    }
}

impl<T> Default for TextureRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_len() {
        assert_eq!(rgba8_len(1, 1), Some(4));
        assert_eq!(rgba8_len(256, 128), Some(256 * 128 * 4));
        assert_eq!(rgba8_len(0, 16), None);
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut registry = TextureRegistry::new();
        let white = registry.insert("white");
        let checker = registry.insert("checker");
        assert_ne!(white, checker);

        assert_eq!(registry.remove(white).as_deref(), Some(&"white"));
        let next = registry.insert("noise");
        assert_ne!(next, white);
        assert!(registry.get(white).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_require_reports_handle() {
        let mut registry: TextureRegistry<u8> = TextureRegistry::new();
        let handle = registry.insert(1);
        registry.remove(handle);
        assert_eq!(
            registry.require(handle).unwrap_err(),
            RendererError::MissingResource("texture #0".to_string())
        );
    }
}

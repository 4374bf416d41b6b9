//! Buffers and images backed by the device allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::device::Device;
use crate::error::{creation_error, vk_error, RendererError, RendererResult};

/// A buffer and its memory.
#[derive(Debug)]
pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy `bytes` into the mapped memory at `offset`.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> RendererResult<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RendererError::InvalidParameter("buffer is not host visible".into()))?;

        let end = offset + bytes.len();
        if end > mapped.len() {
            return Err(RendererError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows buffer of {}",
                bytes.len(),
                mapped.len()
            )));
        }
        mapped[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Mapped memory contents, for read-back buffers.
    pub fn mapped(&self) -> RendererResult<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| RendererError::InvalidParameter("buffer is not host visible".into()))
    }
}

/// Parameters of a 2D image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
}

impl ImageDesc {
    pub fn new(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
        }
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

/// An image and its memory.
#[derive(Debug)]
pub struct GpuImage {
    image: vk::Image,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl GpuImage {
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

/// An image with one view over it, the usual shape of an attachment.
#[derive(Debug)]
pub struct Attachment {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

impl Device {
    /// Create a buffer in `location`. Host-visible buffers with `initial_data`
    /// are written through the mapped pointer right away.
    pub fn create_buffer(
        &self,
        name: &str,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        size: vk::DeviceSize,
        initial_data: Option<&[u8]>,
    ) -> RendererResult<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.raw().create_buffer(&buffer_info, None) }
            .map_err(creation_error(name))?;
        let requirements = unsafe { self.raw().get_buffer_memory_requirements(buffer) };

        let allocation = self.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RendererError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.raw().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut gpu_buffer = GpuBuffer {
            buffer,
            allocation: None,
            size,
        };

        let bind = unsafe {
            self.raw()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        gpu_buffer.allocation = Some(allocation);
        if let Err(e) = bind {
            self.destroy_buffer(gpu_buffer);
            return Err(creation_error(name)(e));
        }

        if let Some(data) = initial_data {
            if let Err(e) = gpu_buffer.write_bytes(0, data) {
                self.destroy_buffer(gpu_buffer);
                return Err(e);
            }
        }

        log::trace!("Created buffer '{name}' ({size} bytes, {location:?})");
        Ok(gpu_buffer)
    }

    /// Create a device-local buffer holding `data`, uploaded through a staging
    /// buffer with a blocking one-shot copy.
    pub fn create_device_local_buffer(
        &self,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> RendererResult<GpuBuffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = self.create_buffer(
            "staging",
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            size,
            Some(data),
        )?;

        let result = self
            .create_buffer(
                name,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
                size,
                None,
            )
            .and_then(|buffer| {
                let copied = self.begin_single_time_commands().and_then(|commands| {
                    let region = vk::BufferCopy::default().size(size);
                    unsafe {
                        self.raw().cmd_copy_buffer(
                            commands.buffer(),
                            staging.raw(),
                            buffer.raw(),
                            &[region],
                        );
                    }
                    commands.end()
                });
                match copied {
                    Ok(()) => Ok(buffer),
                    Err(e) => {
                        self.destroy_buffer(buffer);
                        Err(e)
                    }
                }
            });

        self.destroy_buffer(staging);
        result
    }

    /// Create a 2D image with optimal tiling in device-local memory.
    pub fn create_image(&self, name: &str, desc: &ImageDesc) -> RendererResult<GpuImage> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { self.raw().create_image(&image_info, None) }
            .map_err(creation_error(name))?;
        let requirements = unsafe { self.raw().get_image_memory_requirements(image) };

        let allocation = self.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RendererError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.raw().destroy_image(image, None) };
                return Err(e);
            }
        };

        let bind = unsafe {
            self.raw()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let gpu_image = GpuImage {
            image,
            allocation: Some(allocation),
            desc: *desc,
        };
        if let Err(e) = bind {
            self.destroy_image(gpu_image);
            return Err(creation_error(name)(e));
        }

        log::trace!(
            "Created image '{name}' {}x{} {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(gpu_image)
    }

    /// Create an image and a view over it.
    pub fn create_attachment(
        &self,
        name: &str,
        desc: &ImageDesc,
        aspect: vk::ImageAspectFlags,
    ) -> RendererResult<Attachment> {
        let image = self.create_image(name, desc)?;
        match self.create_image_view(image.raw(), desc.format, aspect, desc.mip_levels) {
            Ok(view) => Ok(Attachment { image, view }),
            Err(e) => {
                self.destroy_image(image);
                Err(e)
            }
        }
    }

    /// Make transfer writes into a read-back buffer available to the host.
    /// Recorded after the copy, before the command buffer ends.
    pub fn insert_host_read_barrier(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) {
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);

        unsafe {
            self.raw().cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }

    /// Invalidate the host cache of a mapped buffer whose memory is not
    /// coherent. No-op for coherent memory.
    pub fn invalidate_buffer(&self, buffer: &GpuBuffer) -> RendererResult<()> {
        let Some(allocation) = buffer.allocation.as_ref() else {
            return Ok(());
        };
        if allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }

        let (offset, size) = atom_aligned_range(
            allocation.offset(),
            allocation.size(),
            self.properties().limits.non_coherent_atom_size,
        );
        unsafe {
            let range = vk::MappedMemoryRange::default()
                .memory(allocation.memory())
                .offset(offset)
                .size(size);
            self.raw().invalidate_mapped_memory_ranges(&[range])
        }
        .map_err(vk_error("invalidate read-back buffer"))
    }

    pub fn destroy_buffer(&self, mut buffer: GpuBuffer) {
        unsafe { self.raw().destroy_buffer(buffer.buffer, None) };
        if let Some(allocation) = buffer.allocation.take() {
            self.free_allocation(allocation);
        }
    }

    pub fn destroy_image(&self, mut image: GpuImage) {
        unsafe { self.raw().destroy_image(image.image, None) };
        if let Some(allocation) = image.allocation.take() {
            self.free_allocation(allocation);
        }
    }

    pub fn destroy_attachment(&self, attachment: Attachment) {
        unsafe { self.raw().destroy_image_view(attachment.view, None) };
        self.destroy_image(attachment.image);
    }

    fn free_allocation(&self, allocation: Allocation) {
        match self.allocator() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    log::warn!("Failed to free GPU allocation: {e}");
                }
            }
            Err(e) => log::warn!("Leaking GPU allocation: {e}"),
        }
    }
}

/// Widen `offset..offset + size` to multiples of the non-coherent atom size.
fn atom_aligned_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    let end = (offset + size).div_ceil(atom) * atom;
    (start, end - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_aligned_range() {
        assert_eq!(atom_aligned_range(0, 8, 64), (0, 64));
        assert_eq!(atom_aligned_range(72, 8, 64), (64, 64));
        assert_eq!(atom_aligned_range(60, 8, 64), (0, 128));
        assert_eq!(atom_aligned_range(128, 64, 64), (128, 64));
        assert_eq!(atom_aligned_range(3, 8, 1), (3, 8));
        assert_eq!(atom_aligned_range(3, 8, 0), (3, 8));
    }

    #[test]
    fn test_image_desc_defaults() {
        let desc = ImageDesc::new(
            vk::Extent2D {
                width: 16,
                height: 8,
            },
            vk::Format::R32G32_UINT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.mip_levels, 1);

        let msaa = desc.samples(vk::SampleCountFlags::TYPE_4);
        assert_eq!(msaa.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(msaa.format, vk::Format::R32G32_UINT);
    }

    #[test]
    fn test_unmapped_buffer_rejects_writes() {
        let mut buffer = GpuBuffer {
            buffer: vk::Buffer::null(),
            allocation: None,
            size: 4,
        };
        assert!(matches!(
            buffer.write_bytes(0, &[1, 2, 3, 4]),
            Err(RendererError::InvalidParameter(_))
        ));
        assert!(buffer.mapped().is_err());
    }
}

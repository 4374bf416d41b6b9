//! Per-frame uniform buffers.

use std::marker::PhantomData;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;

use super::device::Device;
use super::garbage::GpuGarbage;
use super::memory::GpuBuffer;
use crate::error::RendererResult;
use crate::frame::{FrameSlot, PerFrame};

/// One persistently mapped uniform buffer per frame slot holding a `T`.
///
/// The CPU writes the buffer of the slot being prepared while the GPU may
/// still read the other one, so a slot is only written after its fence.
#[derive(Debug)]
pub struct FrameUniforms<T: Pod> {
    buffers: PerFrame<GpuBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Pod> FrameUniforms<T> {
    pub fn new(device: &Device, name: &str) -> RendererResult<Self> {
        let size = std::mem::size_of::<T>() as vk::DeviceSize;
        let mut created = Vec::new();
        for slot in FrameSlot::all() {
            let buffer = device.create_buffer(
                &format!("{name} ({slot})"),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                size,
                Some(bytemuck::bytes_of(&T::zeroed())),
            );
            match buffer {
                Ok(buffer) => created.push(buffer),
                Err(e) => {
                    for buffer in created {
                        device.destroy_buffer(buffer);
                    }
                    return Err(e);
                }
            }
        }

        let mut created = created.into_iter();
        let buffers = PerFrame::try_from_fn(|_| {
            created.next().ok_or_else(|| {
                crate::error::RendererError::MissingResource(format!("{name} buffer"))
            })
        })?;
        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    /// Overwrite the buffer of `slot`. Its fence must have been waited on.
    pub fn write(&mut self, slot: FrameSlot, value: &T) -> RendererResult<()> {
        self.buffers[slot].write_bytes(0, bytemuck::bytes_of(value))
    }

    pub fn buffer(&self, slot: FrameSlot) -> vk::Buffer {
        self.buffers[slot].raw()
    }

    pub fn size(&self) -> vk::DeviceSize {
        std::mem::size_of::<T>() as vk::DeviceSize
    }

    pub fn into_garbage(self) -> Vec<GpuGarbage> {
        self.buffers.into_iter().map(GpuGarbage::Buffer).collect()
    }
}

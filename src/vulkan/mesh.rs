//! Device-local meshes and the draw calls that consume them.

use ash::vk;
use glam::Vec3;

use super::device::Device;
use super::garbage::GpuGarbage;
use super::memory::GpuBuffer;
use super::pipeline::PUSH_CONSTANT_STAGES;
use crate::error::{RendererError, RendererResult};
use crate::uniforms::{ObjectPushConstants, Vertex};

/// Check that a mesh is drawable: at least one triangle and every index in range.
pub fn validate_mesh(vertex_count: usize, indices: &[u32]) -> RendererResult<()> {
    if indices.is_empty() || indices.len() % 3 != 0 {
        return Err(RendererError::InvalidParameter(format!(
            "mesh needs whole triangles, got {} indices",
            indices.len()
        )));
    }
    if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(RendererError::InvalidParameter(format!(
            "index {index} out of range for {vertex_count} vertices"
        )));
    }
    Ok(())
}

/// Single-colored cube centered on the origin with outward counter-clockwise
/// faces. Also serves as the skybox volume.
pub fn cube(half_extent: f32, color: [f32; 4]) -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u, v) with u x v = normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];
    let corners = [
        (-1.0, -1.0, [0.0, 1.0]),
        (1.0, -1.0, [1.0, 1.0]),
        (1.0, 1.0, [1.0, 0.0]),
        (-1.0, 1.0, [0.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv, uv) in corners {
            let position = (normal + u * su + v * sv) * half_extent;
            vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv,
                color,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Vertex and index buffers in device-local memory.
#[derive(Debug)]
pub struct GpuMesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl GpuMesh {
    /// Upload through staging buffers. Blocks until both copies finished.
    pub fn upload(device: &Device, vertices: &[Vertex], indices: &[u32]) -> RendererResult<Self> {
        validate_mesh(vertices.len(), indices)?;

        let vertex_buffer = device.create_device_local_buffer(
            "vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = match device.create_device_local_buffer(
            "indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        log::debug!(
            "Uploaded mesh: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Push `constants` and draw. The pipeline and its sets must be bound.
    pub fn draw(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        constants: &ObjectPushConstants,
    ) {
        push_object_constants(device, cmd, layout, constants);
        unsafe {
            device
                .raw()
                .cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.raw()], &[0]);
            device
                .raw()
                .cmd_bind_index_buffer(cmd, self.index_buffer.raw(), 0, vk::IndexType::UINT32);
            device
                .raw()
                .cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }

    pub fn into_garbage(self) -> Vec<GpuGarbage> {
        vec![
            GpuGarbage::Buffer(self.vertex_buffer),
            GpuGarbage::Buffer(self.index_buffer),
        ]
    }
}

pub fn push_object_constants(
    device: &Device,
    cmd: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    constants: &ObjectPushConstants,
) {
    unsafe {
        device.raw().cmd_push_constants(
            cmd,
            layout,
            PUSH_CONSTANT_STAGES,
            0,
            bytemuck::bytes_of(constants),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_faces_point_outward() {
        let (vertices, indices) = cube(0.5, [1.0; 4]);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(validate_mesh(vertices.len(), &indices).is_ok());

        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(vertices[triangle[i] as usize].position));
            let normal = Vec3::from(vertices[triangle[0] as usize].normal);
            let winding = (b - a).cross(c - a);
            assert!(winding.dot(normal) > 0.0, "triangle {triangle:?} is clockwise");
            // Every corner sits on the face plane.
            assert!((a.dot(normal) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_validate_mesh() {
        assert!(validate_mesh(3, &[0, 1, 2]).is_ok());
        assert!(matches!(
            validate_mesh(3, &[0, 1, 3]),
            Err(RendererError::InvalidParameter(_))
        ));
        assert!(validate_mesh(3, &[0, 1]).is_err());
        assert!(validate_mesh(0, &[]).is_err());
    }
}

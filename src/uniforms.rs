//! GPU-visible data layouts shared with the built-in shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::picking::encode_id;

/// Per-frame camera block bound at set 0, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    /// xyz camera position, w unused.
    pub position: [f32; 4],
    /// Cursor position in viewport pixels, zw unused.
    pub cursor: [f32; 4],
}

impl CameraUniform {
    pub fn new(view: Mat4, projection: Mat4, position: Vec3, cursor: Vec2) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: (projection * view).to_cols_array_2d(),
            position: position.extend(1.0).to_array(),
            cursor: [cursor.x, cursor.y, 0.0, 0.0],
        }
    }

    /// Same camera with an updated cursor.
    pub fn with_cursor(mut self, cursor: Vec2) -> Self {
        self.cursor = [cursor.x, cursor.y, 0.0, 0.0];
        self
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO, Vec2::ZERO)
    }
}

/// Per-draw push constants for the mesh and picking pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectPushConstants {
    pub model: [[f32; 4]; 4],
    /// Object identifier split as `[lower, upper]`.
    pub id: [u32; 2],
    pub _padding: [u32; 2],
}

impl ObjectPushConstants {
    pub fn new(model: Mat4, id: u64) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            id: encode_id(id),
            _padding: [0; 2],
        }
    }
}

/// Interleaved vertex consumed by the mesh, picking and skybox pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 224);
        assert_eq!(std::mem::size_of::<ObjectPushConstants>(), 80);
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
    }

    #[test]
    fn test_push_constant_id_split() {
        let constants = ObjectPushConstants::new(Mat4::IDENTITY, 0x0000_0002_ABCD_1234);
        assert_eq!(constants.id, [0xABCD_1234, 2]);
    }

    #[test]
    fn test_camera_view_projection() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let projection = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);
        let camera = CameraUniform::new(view, projection, Vec3::new(0.0, 0.0, 5.0), Vec2::ZERO);
        assert_eq!(
            camera.view_projection,
            (projection * view).to_cols_array_2d()
        );
    }
}

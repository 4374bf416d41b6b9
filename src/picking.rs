//! Object picking math shared by every backend.
//!
//! Pickable objects write their 64-bit identifier into a two-channel 32-bit
//! unsigned integer target as `[lower, upper]`. The renderer restricts that
//! pass to a single texel under the cursor and reads it back on request.

use ash::vk;
use glam::Vec2;

/// Identifier stored in the picking target where nothing was drawn.
pub const NO_OBJECT: u64 = 0;

/// Split an identifier into the two texel channels.
pub fn encode_id(id: u64) -> [u32; 2] {
    [id as u32, (id >> 32) as u32]
}

/// Rebuild an identifier from the two texel channels.
pub fn decode_id(texel: [u32; 2]) -> u64 {
    ((texel[1] as u64) << 32) | texel[0] as u64
}

/// Placement of the scene viewport inside the window, in pixels.
///
/// Without a dedicated viewport panel the viewport covers the whole window
/// and `position` stays at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportBounds {
    pub position: Vec2,
    pub size: Vec2,
    pub min: Vec2,
    pub max: Vec2,
}

impl ViewportBounds {
    /// Bounds covering a full `width` x `height` surface.
    pub fn full(width: u32, height: u32) -> Self {
        let size = Vec2::new(width as f32, height as f32);
        Self {
            position: Vec2::ZERO,
            size,
            min: Vec2::ZERO,
            max: size,
        }
    }

    /// Translate a window-space cursor into viewport space.
    pub fn relative_cursor(&self, cursor: Vec2) -> Vec2 {
        cursor - self.position
    }

    /// Whether a window-space cursor lies inside the viewport.
    pub fn contains(&self, cursor: Vec2) -> bool {
        cursor.cmpge(self.min).all() && cursor.cmplt(self.max).all()
    }

    /// Resize while keeping the current position.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = Vec2::new(width as f32, height as f32);
        self.min = self.position;
        self.max = self.position + self.size;
    }
}

/// Texel of the picking target that lies under the cursor.
///
/// The cursor is made viewport-relative and clamped into the target extent so
/// the resulting texel is always addressable.
pub fn cursor_texel(cursor: Vec2, bounds: &ViewportBounds, extent: vk::Extent2D) -> (u32, u32) {
    let local = bounds.relative_cursor(cursor);
    let max_x = extent.width.saturating_sub(1) as f32;
    let max_y = extent.height.saturating_sub(1) as f32;
    (
        local.x.clamp(0.0, max_x) as u32,
        local.y.clamp(0.0, max_y) as u32,
    )
}

/// One-texel scissor used while recording the picking pass.
pub fn picking_scissor(cursor: Vec2, bounds: &ViewportBounds, extent: vk::Extent2D) -> vk::Rect2D {
    let (x, y) = cursor_texel(cursor, bounds, extent);
    vk::Rect2D {
        offset: vk::Offset2D {
            x: x as i32,
            y: y as i32,
        },
        extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
    }
}

/// Scissor covering the full target.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Whether `rect` contains the texel at (`x`, `y`).
pub fn rect_contains(rect: &vk::Rect2D, x: u32, y: u32) -> bool {
    let (x, y) = (x as i64, y as i64);
    let left = rect.offset.x as i64;
    let top = rect.offset.y as i64;
    x >= left
        && y >= top
        && x < left + rect.extent.width as i64
        && y < top + rect.extent.height as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn test_id_halves() {
        assert_eq!(encode_id(0xABCD1234), [0xABCD1234, 0]);
        assert_eq!(encode_id(0x0000_0001_0000_0002), [2, 1]);
        assert_eq!(decode_id([0xFFFF_FFFF, 0x1]), 0x1_FFFF_FFFF);
        assert_eq!(decode_id([0, 0]), NO_OBJECT);
    }

    #[test]
    fn test_scissor_is_single_texel_at_cursor() {
        let bounds = ViewportBounds::full(800, 600);
        let scissor = picking_scissor(Vec2::new(120.7, 48.2), &bounds, EXTENT);
        assert_eq!(scissor.offset.x, 120);
        assert_eq!(scissor.offset.y, 48);
        assert_eq!(scissor.extent.width, 1);
        assert_eq!(scissor.extent.height, 1);
    }

    #[test]
    fn test_scissor_clamped_into_extent() {
        let bounds = ViewportBounds::full(800, 600);
        let scissor = picking_scissor(Vec2::new(5000.0, -20.0), &bounds, EXTENT);
        assert_eq!((scissor.offset.x, scissor.offset.y), (799, 0));
    }

    #[test]
    fn test_cursor_relative_to_viewport_panel() {
        let mut bounds = ViewportBounds {
            position: Vec2::new(200.0, 100.0),
            ..Default::default()
        };
        bounds.resize(400, 300);
        assert!(bounds.contains(Vec2::new(250.0, 150.0)));
        assert!(!bounds.contains(Vec2::new(150.0, 150.0)));
        assert_eq!(
            cursor_texel(Vec2::new(250.0, 150.0), &bounds, EXTENT),
            (50, 50)
        );
    }

    #[test]
    fn test_rect_contains() {
        let rect = picking_scissor(Vec2::new(10.0, 20.0), &ViewportBounds::full(800, 600), EXTENT);
        assert!(rect_contains(&rect, 10, 20));
        assert!(!rect_contains(&rect, 11, 20));
        assert!(rect_contains(&full_scissor(EXTENT), 799, 599));
    }
}

//! Orthographic 2D camera.

use crate::util::{Mat4, Vec2, Vec3};

/// Orthographic camera looking down -Z at the XY plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera2D {
    pub position: Vec2,
    /// Half of the visible height in world units
    pub ortho_size: f32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Linear RGBA the material G-buffer is cleared to
    pub background: [f32; 4],
}

impl Default for Camera2D {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            ortho_size: 1.0,
            pixel_width: 1024,
            pixel_height: 1024,
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Camera2D {
    pub fn new(pixel_width: u32, pixel_height: u32) -> Self {
        Self { pixel_width, pixel_height, ..Default::default() }
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_ortho_size(mut self, ortho_size: f32) -> Self {
        self.ortho_size = ortho_size;
        self
    }

    pub fn with_background(mut self, background: [f32; 4]) -> Self {
        self.background = background;
        self
    }

    pub fn aspect(&self) -> f32 {
        self.pixel_width.max(1) as f32 / self.pixel_height.max(1) as f32
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (self.pixel_width, self.pixel_height)
    }

    pub fn camera_to_world(&self) -> Mat4 {
        Mat4::from_translation(self.position.extend(0.0))
    }

    pub fn projection(&self) -> Mat4 {
        let hh = self.ortho_size;
        let hw = hh * self.aspect();
        Mat4::orthographic_rh(-hw, hw, -hh, hh, -1.0, 1.0)
    }

    /// World -> NDC: `projection * view^-1`.
    pub fn world_to_screen(&self) -> Mat4 {
        self.projection() * self.camera_to_world().inverse()
    }

    /// Inverse of [`world_to_screen`](Self::world_to_screen) for points on the plane.
    pub fn screen_to_world(&self, ndc: Vec2) -> Vec2 {
        let p = self.world_to_screen().inverse().transform_point3(Vec3::new(ndc.x, ndc.y, 0.0));
        p.truncate()
    }
}

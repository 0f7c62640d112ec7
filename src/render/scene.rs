//! Scene boundary: whatever fills the G-buffer each frame.

use crate::gpu::cpu::CpuBackend;
use crate::gpu::GpuBackend;
use crate::util::{ndc_to_pixel, Result, Vec2, Vec3};

use super::camera::Camera2D;
use super::targets::RenderTargets;

/// Draws scene geometry into the bound G-buffer targets.
pub trait Scene<B: GpuBackend + ?Sized> {
    fn draw_gbuffer(&self, backend: &mut B, targets: &RenderTargets, camera: &Camera2D) -> Result<()>;
}

/// Scene with no geometry; the G-buffer keeps its clear values.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyScene;

impl<B: GpuBackend + ?Sized> Scene<B> for EmptyScene {
    fn draw_gbuffer(&self, _backend: &mut B, _targets: &RenderTargets, _camera: &Camera2D) -> Result<()> {
        Ok(())
    }
}

/// Axis-aligned material sprite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sprite {
    pub center: Vec2,
    pub size: Vec2,
    pub albedo: Vec3,
    pub material_index: u8,
    pub normal: Vec2,
    /// 0 = transparent, 1 = opaque
    pub density: f32,
    pub boundary: f32,
}

impl Default for Sprite {
    fn default() -> Self {
        Self {
            center: Vec2::ZERO,
            size: Vec2::ONE,
            albedo: Vec3::splat(0.5),
            material_index: 1,
            normal: Vec2::ZERO,
            density: 1.0,
            boundary: 0.0,
        }
    }
}

/// Sprites rasterized by the CPU backend, in draw order.
#[derive(Debug, Clone, Default)]
pub struct SpriteScene {
    pub sprites: Vec<Sprite>,
}

impl SpriteScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sprite(mut self, sprite: Sprite) -> Self {
        self.sprites.push(sprite);
        self
    }
}

impl Scene<CpuBackend> for SpriteScene {
    fn draw_gbuffer(&self, backend: &mut CpuBackend, targets: &RenderTargets, camera: &Camera2D) -> Result<()> {
        let (width, height) = targets.size();
        let to_pixel = ndc_to_pixel(width, height) * camera.world_to_screen();
        let material = targets.material()?;
        let structure = targets.structure()?;

        for sprite in &self.sprites {
            let half = sprite.size * 0.5;
            let a = to_pixel.transform_point3((sprite.center - half).extend(0.0));
            let b = to_pixel.transform_point3((sprite.center + half).extend(0.0));
            let (x0, x1) = (a.x.min(b.x).round() as i32, a.x.max(b.x).round() as i32);
            let (y0, y1) = (a.y.min(b.y).round() as i32, a.y.max(b.y).round() as i32);

            let albedo = sprite.albedo;
            let index = sprite.material_index as f32 / 255.0;
            backend.fill_rect(material, x0, y0, x1, y1, [albedo.x, albedo.y, albedo.z, index])?;
            let s = [sprite.normal.x, sprite.normal.y, sprite.density, sprite.boundary];
            backend.fill_rect(structure, x0, y0, x1, y1, s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprite_covers_expected_pixels() {
        let mut gpu = CpuBackend::new();
        let mut targets = RenderTargets::new();
        targets.ensure_targets(&mut gpu, 8, 8, false).unwrap();
        targets.clear_and_bind(&mut gpu, [0.0; 4]).unwrap();
        // camera sees [-1, 1]^2; sprite covers the right half
        let scene = SpriteScene::new().with_sprite(Sprite {
            center: Vec2::new(0.5, 0.0),
            size: Vec2::new(1.0, 2.0),
            density: 0.5,
            ..Default::default()
        });
        scene.draw_gbuffer(&mut gpu, &targets, &Camera2D::new(8, 8)).unwrap();
        let structure = gpu.read_texture(targets.structure().unwrap(), 0).unwrap();
        assert_eq!(structure.get(3, 4)[2], 0.0);
        assert_eq!(structure.get(4, 4)[2], 0.5);
        assert!((structure.channel_sums()[2] - 16.0).abs() < 1e-3);
    }
}

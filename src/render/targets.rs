//! Render target ownership.
//!
//! All targets are sized together from one logical resolution. The
//! accumulation textures use the next power of two in each dimension so that
//! their mip chains halve cleanly down to 1x1.

use crate::gpu::{GpuBackend, TextureDesc, TextureFormat, TextureId};
use crate::util::{next_pow2, Error, Result};

/// Every texture the renderer owns. `None` means not allocated.
#[derive(Debug, Default)]
pub struct RenderTargets {
    pub gbuffer_light: Option<TextureId>,
    /// Albedo + material index
    pub gbuffer_material: Option<TextureId>,
    /// Normal + density + boundary
    pub gbuffer_structure: Option<TextureId>,
    pub outscatter: Option<TextureId>,
    pub outscatter_variance: Option<TextureId>,
    pub outscatter_atomic: Option<TextureId>,
    /// Present only in training mode
    pub training_target: Option<TextureId>,
    width: u32,
    height: u32,
    pot_width: u32,
    pot_height: u32,
}

fn required(id: Option<TextureId>, name: &str) -> Result<TextureId> {
    id.ok_or_else(|| Error::other(format!("render target '{name}' not allocated")))
}

impl RenderTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical (camera or training) resolution.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Power-of-two resolution of the accumulation textures.
    pub fn accumulation_size(&self) -> (u32, u32) {
        (self.pot_width, self.pot_height)
    }

    /// Descriptor shared by the accumulation texture and its scratch copies.
    pub fn accumulation_desc(&self) -> TextureDesc {
        TextureDesc::new("Outscatter", self.pot_width, self.pot_height, TextureFormat::Rgba32Float)
            .with_full_mip_chain()
    }

    pub fn mip_levels(&self) -> u32 {
        if self.outscatter.is_some() { self.accumulation_desc().mip_levels } else { 0 }
    }

    pub fn is_allocated(&self) -> bool {
        self.gbuffer_material.is_some()
    }

    pub fn light(&self) -> Result<TextureId> {
        required(self.gbuffer_light, "gbuffer light")
    }

    pub fn material(&self) -> Result<TextureId> {
        required(self.gbuffer_material, "gbuffer material")
    }

    pub fn structure(&self) -> Result<TextureId> {
        required(self.gbuffer_structure, "gbuffer structure")
    }

    pub fn accumulation(&self) -> Result<TextureId> {
        required(self.outscatter, "outscatter")
    }

    pub fn variance(&self) -> Result<TextureId> {
        required(self.outscatter_variance, "outscatter variance")
    }

    pub fn atomic(&self) -> Result<TextureId> {
        required(self.outscatter_atomic, "outscatter atomic")
    }

    pub fn training(&self) -> Result<TextureId> {
        required(self.training_target, "training target")
    }

    /// Make sure every target exists at `width x height`.
    ///
    /// Returns `Ok(false)` when nothing had to change. Any allocation failure
    /// releases what was created so far and is returned to the caller.
    #[tracing::instrument(level = "debug", skip(self, backend))]
    pub fn ensure_targets<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
        training: bool,
    ) -> Result<bool> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        let matches = self
            .gbuffer_material
            .and_then(|id| backend.texture_desc(id))
            .is_some_and(|d| d.width == width && d.height == height);
        if matches && self.training_target.is_some() == training {
            return Ok(false);
        }

        self.release_all(backend);
        if let Err(e) = self.create(backend, width, height, training) {
            self.release_all(backend);
            return Err(e);
        }
        tracing::debug!(
            width,
            height,
            pot_width = self.pot_width,
            pot_height = self.pot_height,
            "render targets recreated"
        );
        Ok(true)
    }

    fn create<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, width: u32, height: u32, training: bool) -> Result<()> {
        self.width = width;
        self.height = height;
        self.pot_width = next_pow2(width);
        self.pot_height = next_pow2(height);
        let (pw, ph) = (self.pot_width, self.pot_height);

        self.gbuffer_light = Some(backend.create_texture(&TextureDesc::new(
            "GBuffer Light",
            width,
            height,
            TextureFormat::Rgba32Float,
        ))?);
        self.gbuffer_material = Some(backend.create_texture(&TextureDesc::new(
            "GBuffer Material",
            width,
            height,
            TextureFormat::Bgra8Unorm,
        ))?);
        self.gbuffer_structure = Some(backend.create_texture(&TextureDesc::new(
            "GBuffer Structure",
            width,
            height,
            TextureFormat::Rgba16Float,
        ))?);

        let accumulation = self.accumulation_desc();
        self.outscatter = Some(backend.create_texture(&accumulation.clone().with_random_write(true))?);
        self.outscatter_variance =
            Some(backend.create_texture(&accumulation.with_label("Outscatter Variance"))?);
        self.outscatter_atomic = Some(backend.create_texture(
            &TextureDesc::new("Outscatter Atomic", pw * 4, ph, TextureFormat::R32Uint).with_random_write(true),
        )?);

        if training {
            self.training_target = Some(backend.create_texture(&TextureDesc::new(
                "Training Target",
                pw,
                ph,
                TextureFormat::Rgba32Float,
            ))?);
        }
        Ok(())
    }

    /// Clear every frame target and bind the G-buffer for scene drawing.
    pub fn clear_and_bind<B: GpuBackend + ?Sized>(&self, backend: &mut B, background: [f32; 4]) -> Result<()> {
        self.clear_accumulation(backend)?;
        backend.clear_texture(self.light()?, [0.0; 4])?;
        backend.clear_texture(self.structure()?, [0.0; 4])?;
        backend.clear_texture(self.material()?, background)?;
        backend.bind_render_targets(&[self.light()?, self.material()?, self.structure()?])
    }

    /// Clear the accumulation texture and atomic surface.
    pub fn clear_accumulation<B: GpuBackend + ?Sized>(&self, backend: &mut B) -> Result<()> {
        backend.clear_texture(self.accumulation()?, [0.0; 4])?;
        backend.clear_texture(self.atomic()?, [0.0; 4])
    }

    /// Release everything. Safe to call repeatedly.
    pub fn release_all<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        let slots = [
            &mut self.gbuffer_light,
            &mut self.gbuffer_material,
            &mut self.gbuffer_structure,
            &mut self.outscatter,
            &mut self.outscatter_variance,
            &mut self.outscatter_atomic,
            &mut self.training_target,
        ];
        for slot in slots {
            if let Some(id) = slot.take() {
                if let Err(e) = backend.release_texture(id) {
                    tracing::warn!("failed to release render target {}: {e}", id.raw());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::cpu::CpuBackend;

    #[test]
    fn test_ensure_is_idempotent() {
        let mut gpu = CpuBackend::new();
        let mut targets = RenderTargets::new();
        assert!(targets.ensure_targets(&mut gpu, 1000, 600, false).unwrap());
        assert_eq!(targets.accumulation_size(), (1024, 1024));
        assert_eq!(targets.mip_levels(), 11);
        let created = gpu.stats().textures_created;
        assert!(!targets.ensure_targets(&mut gpu, 1000, 600, false).unwrap());
        assert_eq!(gpu.stats().textures_created, created);
    }

    #[test]
    fn test_training_toggle_recreates() {
        let mut gpu = CpuBackend::new();
        let mut targets = RenderTargets::new();
        targets.ensure_targets(&mut gpu, 64, 64, false).unwrap();
        assert!(targets.training_target.is_none());
        assert!(targets.ensure_targets(&mut gpu, 64, 64, true).unwrap());
        assert!(targets.training_target.is_some());
        assert_eq!(gpu.stats().live_textures(), 7);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut gpu = CpuBackend::new();
        let mut targets = RenderTargets::new();
        assert!(matches!(
            targets.ensure_targets(&mut gpu, 0, 10, false),
            Err(Error::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_oom_leaves_nothing_behind() {
        // enough for the G-buffer, not for the 1024^2 accumulation chain
        let mut gpu = CpuBackend::new().with_memory_budget(16 * 1024 * 1024);
        let mut targets = RenderTargets::new();
        let err = targets.ensure_targets(&mut gpu, 1000, 1000, false).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
        assert_eq!(gpu.stats().bytes_live, 0);
        assert!(!targets.is_allocated());
    }

    #[test]
    fn test_release_all_idempotent() {
        let mut gpu = CpuBackend::new();
        let mut targets = RenderTargets::new();
        targets.ensure_targets(&mut gpu, 32, 16, true).unwrap();
        targets.release_all(&mut gpu);
        targets.release_all(&mut gpu);
        let stats = gpu.stats();
        assert_eq!(stats.textures_created, stats.textures_released);
        assert!(targets.outscatter.is_none());
    }
}

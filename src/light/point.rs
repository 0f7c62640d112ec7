//! Point (disc) light.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{EmittedRay, Emitter};
use crate::util::{Vec2, Vec3};

/// Photons per live frame.
pub const DEFAULT_SEGMENTS: u32 = 10_000;

/// Number of parallel emission batches.
pub const EMIT_BATCHES: usize = 32;

/// Tunable light parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLightParams {
    pub position: Vec2,
    pub radius: f32,
    /// Linear RGB
    pub color: Vec3,
    pub intensity: f32,
    /// Degrees, `[0, 360]`
    pub inner_angle: f32,
    /// Degrees, `[inner_angle, 360]`
    pub outer_angle: f32,
    pub segments: u32,
}

impl Default for PointLightParams {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            radius: 0.1,
            color: Vec3::ONE,
            intensity: 1.0,
            inner_angle: 360.0,
            outer_angle: 360.0,
            segments: DEFAULT_SEGMENTS,
        }
    }
}

impl PointLightParams {
    /// Clamp into valid ranges.
    pub fn sanitized(mut self) -> Self {
        self.radius = self.radius.max(0.0);
        self.intensity = self.intensity.max(0.0);
        self.inner_angle = self.inner_angle.clamp(0.0, 360.0);
        self.outer_angle = self.outer_angle.clamp(self.inner_angle, 360.0);
        self
    }

    /// Energy carried by each photon; `w` is the photon count.
    pub fn photon_energy(&self) -> [f32; 4] {
        let scale = self.radius * self.radius * self.intensity * 1000.0 / self.segments.max(1) as f32;
        [self.color.x * scale, self.color.y * scale, self.color.z * scale, 1.0]
    }
}

/// Disc light emitting uniformly over its area.
///
/// State flags are atomics so that scene code can toggle them through a
/// shared `Arc` while the renderer holds the same light.
#[derive(Debug)]
pub struct PointLight {
    params: RwLock<PointLightParams>,
    active: AtomicBool,
    enabled: AtomicBool,
    destroyed: AtomicBool,
    seed: Option<u64>,
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(PointLightParams::default())
    }
}

impl PointLight {
    pub fn new(params: PointLightParams) -> Self {
        Self {
            params: RwLock::new(params.sanitized()),
            active: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            seed: None,
        }
    }

    /// Fixed RNG seed; otherwise every `emit` reseeds from the clock.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn params(&self) -> PointLightParams {
        *self.params.read()
    }

    pub fn set_params(&self, params: PointLightParams) {
        *self.params.write() = params.sanitized();
    }

    /// Edit parameters in place.
    pub fn update(&self, f: impl FnOnce(&mut PointLightParams)) {
        let mut params = self.params.write();
        f(&mut params);
        *params = params.sanitized();
    }

    /// Owning object active state.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Component enabled state.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    fn clock_seed() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Uniform point on the unit disc from two uniform samples.
#[inline]
fn sample_disc(u: f32, v: f32) -> Vec2 {
    let angle = u * std::f32::consts::TAU;
    let (s, c) = angle.sin_cos();
    Vec2::new(c, s) * v.sqrt()
}

impl Emitter for PointLight {
    fn is_lit(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self.enabled.load(Ordering::Acquire)
            && !self.destroyed.load(Ordering::Acquire)
    }

    fn is_stale(&self) -> bool {
        self.destroyed.load(Ordering::Acquire) || !self.active.load(Ordering::Acquire)
    }

    fn segments(&self) -> u32 {
        self.params.read().segments
    }

    fn emit(&self, rays: &mut [EmittedRay], offset: usize, count: usize) -> usize {
        let end = offset.saturating_add(count).min(rays.len());
        if offset >= end {
            return 0;
        }
        let region = &mut rays[offset..end];
        let written = region.len();
        let batch = written.div_ceil(EMIT_BATCHES);

        let params = self.params();
        let energy = params.photon_energy();
        let seed = self.seed.unwrap_or_else(Self::clock_seed);

        region.par_chunks_mut(batch).enumerate().for_each(|(i, chunk)| {
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
            for ray in chunk {
                let p = params.position + sample_disc(rng.gen(), rng.gen()) * params.radius;
                *ray = EmittedRay::new(p.to_array(), energy);
            }
        });
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(segments: u32, radius: f32) -> PointLight {
        PointLight::new(PointLightParams { segments, radius, ..Default::default() }).with_seed(7)
    }

    #[test]
    fn test_emit_stays_in_range() {
        let l = light(1000, 1.0);
        let sentinel = EmittedRay::new([9.0, 9.0], [-1.0; 4]);
        let mut rays = vec![sentinel; 200];
        let n = l.emit(&mut rays, 50, 100);
        assert_eq!(n, 100);
        assert!(rays[..50].iter().all(|r| *r == sentinel));
        assert!(rays[150..].iter().all(|r| *r == sentinel));
        assert!(rays[50..150].iter().all(|r| r.energy[3] == 1.0 && r.direction == [0.0, 0.0]));
    }

    #[test]
    fn test_emit_clamps_to_slice() {
        let l = light(1000, 1.0);
        let mut rays = vec![EmittedRay::default(); 10];
        assert_eq!(l.emit(&mut rays, 8, 100), 2);
        assert_eq!(l.emit(&mut rays, 10, 5), 0);
    }

    #[test]
    fn test_positions_within_radius() {
        let l = PointLight::new(PointLightParams {
            position: Vec2::new(3.0, -2.0),
            radius: 0.5,
            ..Default::default()
        })
        .with_seed(1);
        let mut rays = vec![EmittedRay::default(); 5000];
        l.emit(&mut rays, 0, 5000);
        for r in &rays {
            let d = Vec2::from_array(r.position) - Vec2::new(3.0, -2.0);
            assert!(d.length() <= 0.5 + 1e-5);
        }
    }

    #[test]
    fn test_disc_sampling_area_uniform() {
        // equal-area rings (radius sqrt(k/4)) x 4 sectors -> 16 equiprobable cells
        let l = light(1000, 1.0);
        let n = 64_000;
        let mut rays = vec![EmittedRay::default(); n];
        l.emit(&mut rays, 0, n);
        let mut cells = [0usize; 16];
        for r in &rays {
            let p = Vec2::from_array(r.position);
            let ring = ((p.length_squared() * 4.0) as usize).min(3);
            let angle = p.y.atan2(p.x).rem_euclid(std::f32::consts::TAU);
            let sector = ((angle / std::f32::consts::FRAC_PI_2) as usize).min(3);
            cells[ring * 4 + sector] += 1;
        }
        let expected = n as f64 / 16.0;
        let chi2: f64 = cells.iter().map(|&c| (c as f64 - expected).powi(2) / expected).sum();
        // 15 dof, p = 0.001 critical value
        assert!(chi2 < 37.7, "chi2 = {chi2}, cells = {cells:?}");
    }

    #[test]
    fn test_energy_formula() {
        let params = PointLightParams {
            radius: 2.0,
            intensity: 0.5,
            color: Vec3::new(1.0, 0.5, 0.0),
            segments: 1000,
            ..Default::default()
        };
        // 2^2 * 0.5 * 1000 / 1000 = 2
        assert_eq!(params.photon_energy(), [2.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_flags() {
        let l = PointLight::default();
        assert!(l.is_lit() && !l.is_stale());
        l.set_enabled(false);
        assert!(!l.is_lit() && !l.is_stale());
        l.set_enabled(true);
        l.set_active(false);
        assert!(!l.is_lit() && l.is_stale());
        l.set_active(true);
        l.destroy();
        assert!(l.is_stale());
    }

    #[test]
    fn test_angles_clamped() {
        let l = PointLight::new(PointLightParams { inner_angle: 500.0, outer_angle: 10.0, ..Default::default() });
        let p = l.params();
        assert_eq!(p.inner_angle, 360.0);
        assert_eq!(p.outer_angle, 360.0);
        l.update(|p| {
            p.inner_angle = 90.0;
            p.outer_angle = 45.0;
        });
        assert_eq!(l.params().outer_angle, 90.0);
    }
}

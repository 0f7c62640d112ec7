//! Ray emission stage: photon budgets and the fixed-capacity ray buffer.

use std::sync::Arc;

use crate::gpu::{BufferId, GpuBackend};
use crate::light::{EmittedRay, Emitter};
use crate::util::Result;

/// Per-frame photon allocation policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonBudget {
    pub training: bool,
    pub pass_count: u32,
    /// Multiplier applied on training passes after the first
    pub detail: f64,
}

impl PhotonBudget {
    /// Budget for ordinary (non-training) frames.
    pub fn live() -> Self {
        Self { training: false, pass_count: 1, detail: 1.0 }
    }

    /// Photons `light` receives this frame.
    pub fn photons_of(&self, light: &dyn Emitter) -> usize {
        let segments = light.segments() as usize;
        if !self.training || self.pass_count <= 1 {
            segments
        } else {
            (segments as f64 * self.detail.max(0.0)).round() as usize
        }
    }
}

/// Fixed-capacity device ray buffer with a CPU staging copy.
///
/// The staging vector grows lazily up to `capacity`; the device buffer is
/// allocated on first upload.
#[derive(Debug)]
pub struct RayBuffer {
    buffer: Option<BufferId>,
    capacity: usize,
    staging: Vec<EmittedRay>,
}

impl RayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { buffer: None, capacity: capacity.max(1), staging: Vec::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Writable region of `min(count, capacity)` rays.
    pub fn begin_write(&mut self, count: usize) -> &mut [EmittedRay] {
        let len = count.min(self.capacity);
        if self.staging.len() < len {
            self.staging.resize(len, EmittedRay::default());
        }
        &mut self.staging[..len]
    }

    /// Upload the first `written` rays of the region.
    pub fn end_write<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, written: usize) -> Result<()> {
        let buffer = match self.buffer {
            Some(id) => id,
            None => {
                let id = backend.create_ray_buffer("Emitted Rays", self.capacity)?;
                self.buffer = Some(id);
                id
            }
        };
        let written = written.min(self.staging.len());
        backend.write_rays(buffer, &self.staging[..written])
    }

    /// Release the device buffer. Safe to call repeatedly.
    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(id) = self.buffer.take() {
            if let Err(e) = backend.release_buffer(id) {
                tracing::warn!("failed to release ray buffer: {e}");
            }
        }
        self.staging = Vec::new();
    }
}

/// Emit rays for every lit light and upload them.
///
/// Returns the number of rays written. When the total budget exceeds the
/// buffer capacity, later lights are truncated.
#[tracing::instrument(level = "debug", skip_all, fields(lights = lights.len()))]
pub fn emit_all<B: GpuBackend + ?Sized>(
    lights: &[Arc<dyn Emitter>],
    budget: &PhotonBudget,
    rays: &mut RayBuffer,
    backend: &mut B,
) -> Result<usize> {
    let lit: Vec<(&Arc<dyn Emitter>, usize)> = lights
        .iter()
        .filter(|l| l.is_lit() && !l.is_stale())
        .map(|l| (l, budget.photons_of(l.as_ref())))
        .collect();
    let desired: usize = lit.iter().map(|(_, n)| n).sum();
    if desired == 0 {
        return Ok(0);
    }

    let capacity = rays.capacity();
    if desired > capacity {
        tracing::warn!(desired, capacity, "ray budget exceeds buffer capacity, truncating");
    }

    let region = rays.begin_write(desired);
    let mut offset = 0;
    for (light, photons) in lit {
        let remaining = region.len() - offset;
        if remaining == 0 {
            break;
        }
        offset += light.emit(region, offset, photons.min(remaining));
    }
    rays.end_write(backend, offset)?;
    tracing::trace!(rays = offset, "emitted");
    Ok(offset)
}

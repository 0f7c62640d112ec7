//! Light emitters and the photon-ray record they produce.
//!
//! An [`Emitter`] is anything that can inject photon-rays into a frame. The
//! renderer never owns emitters: scene code keeps an `Arc<dyn Emitter>` and
//! re-registers it every tick into the session's
//! [`LightRegistry`](registry::LightRegistry).

mod point;
pub mod registry;

use bytemuck::{Pod, Zeroable};

pub use point::{PointLight, PointLightParams, DEFAULT_SEGMENTS, EMIT_BATCHES};
pub use registry::LightRegistry;

/// One photon-ray as uploaded to the trace kernel (32-byte stride).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct EmittedRay {
    pub position: [f32; 2],
    /// Zero at emission; the trace kernel picks directions
    pub direction: [f32; 2],
    /// Linear RGB energy; `w` is 1 and accumulates as a photon count
    pub energy: [f32; 4],
}

impl EmittedRay {
    pub fn new(position: [f32; 2], energy: [f32; 4]) -> Self {
        Self { position, direction: [0.0; 2], energy }
    }
}

/// A light source contributing photon-rays to a frame.
pub trait Emitter: Send + Sync {
    /// Lit emitters receive a photon budget.
    fn is_lit(&self) -> bool;

    /// Stale emitters are evicted at the next emission pass.
    fn is_stale(&self) -> bool;

    /// Photons emitted in one live frame.
    fn segments(&self) -> u32;

    /// Write up to `count` rays into `rays[offset..offset + count]`.
    ///
    /// Must not touch anything outside that range. Returns the number of rays
    /// written, which is never more than `count`.
    fn emit(&self, rays: &mut [EmittedRay], offset: usize, count: usize) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_stride() {
        assert_eq!(std::mem::size_of::<EmittedRay>(), 32);
        let ray = EmittedRay::new([1.0, 2.0], [0.5; 4]);
        let bytes: &[u8] = bytemuck::bytes_of(&ray);
        assert_eq!(bytes.len(), 32);
        assert_eq!(ray.direction, [0.0, 0.0]);
    }
}

//! Reference implementations of `Kernel_Trace` and `Kernel_ConvertOutscatter`.
//!
//! The reference trace kernel deposits each photon at the accumulation texel
//! under its position, attenuated by the structure G-buffer's density
//! channel. Energy is accumulated as saturating fixed-point `u32` values,
//! exactly as the device kernel does with `atomicAdd`.

use glam::{Vec3, Vec4};

use super::ops::Surface;
use crate::gpu::{TraceBindings, ATOMIC_FIXED_POINT_SCALE, CONVERT_TILE, TRACE_GROUP_SIZE};
use crate::light::EmittedRay;

#[inline]
fn to_fixed(v: f32) -> u32 {
    let scaled = (v.max(0.0) * ATOMIC_FIXED_POINT_SCALE).round();
    if scaled >= u32::MAX as f32 { u32::MAX } else { scaled as u32 }
}

/// Deposit rays into the atomic surface (`4 * width` x `height`).
pub(crate) fn trace(
    rays: &[EmittedRay],
    bindings: &TraceBindings,
    groups: [u32; 3],
    structure: Option<&Surface>,
    atomic: &mut [u32],
    height: u32,
) -> usize {
    let width = bindings.atomic_width;
    let invocations = groups[0] as usize * groups[1] as usize * groups[2] as usize * TRACE_GROUP_SIZE as usize;
    let count = rays.len().min(bindings.ray_count as usize).min(invocations);
    let mut deposited = 0;

    for ray in &rays[..count] {
        let clip = bindings.world_to_screen * Vec4::new(ray.position[0], ray.position[1], 0.0, 1.0);
        if clip.w.abs() <= f32::EPSILON {
            continue;
        }
        let ndc = Vec3::new(clip.x / clip.w, clip.y / clip.w, 0.0);
        let pixel = bindings.screen_to_pixel.transform_point3(ndc);
        let (px, py) = (pixel.x.floor(), pixel.y.floor());
        if px < 0.0 || py < 0.0 || px >= width as f32 || py >= height as f32 {
            continue;
        }
        let (px, py) = (px as u32, py as u32);

        let transmit = structure.map_or(1.0, |s| {
            let u = (px as f32 + 0.5) / width as f32;
            let v = (py as f32 + 0.5) / height as f32;
            let sx = (u * s.width as f32) as i64;
            let sy = (v * s.height as f32) as i64;
            1.0 - s.fetch(sx, sy)[2].clamp(0.0, 1.0)
        });

        let base = (py as usize * width as usize + px as usize) * 4;
        for c in 0..4 {
            // photon count (w) is not attenuated
            let e = if c == 3 { ray.energy[c] } else { ray.energy[c] * transmit };
            atomic[base + c] = atomic[base + c].saturating_add(to_fixed(e));
        }
        deposited += 1;
    }
    deposited
}

/// Convert the atomic surface into RGBA32F texels, honouring tile coverage.
pub(crate) fn convert(atomic: &[u32], width: u32, height: u32, groups: [u32; 3], out: &mut [[f32; 4]]) {
    let max_x = (groups[0] * CONVERT_TILE).min(width);
    let max_y = (groups[1] * CONVERT_TILE).min(height);
    for y in 0..max_y {
        for x in 0..max_x {
            let i = (y * width + x) as usize;
            let base = i * 4;
            out[i] = std::array::from_fn(|c| atomic[base + c] as f32 / ATOMIC_FIXED_POINT_SCALE);
        }
    }
}

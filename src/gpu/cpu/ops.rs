//! Software evaluation of the blit operation registry.

use rayon::prelude::*;

use crate::gpu::ops::{BlitOp, VarianceSource, GAUSS10_DOWN, GAUSS3, GAUSS4_DOWN};
use crate::util::luminance;

/// One decoded mip level.
#[derive(Debug, Clone)]
pub(crate) struct Surface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl Surface {
    /// Clamp-to-edge texel fetch.
    #[inline]
    pub fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.pixels[y * self.width as usize + x]
    }

    /// Bilinear sample at normalized coordinates.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let fx = u * self.width as f32 - 0.5;
        let fy = v * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let a = self.fetch(x0, y0);
        let b = self.fetch(x0 + 1, y0);
        let c = self.fetch(x0, y0 + 1);
        let d = self.fetch(x0 + 1, y0 + 1);
        std::array::from_fn(|i| {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            top + (bottom - top) * ty
        })
    }
}

/// Evaluate `f` for every destination texel, one rayon task per row.
fn render<F>(width: u32, height: u32, f: F) -> Vec<[f32; 4]>
where
    F: Fn(u32, u32) -> [f32; 4] + Sync,
{
    let mut out = vec![[0.0f32; 4]; width as usize * height as usize];
    out.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                *px = f(x as u32, y as u32);
            }
        });
    out
}

#[inline]
fn uv(x: u32, y: u32, width: u32, height: u32) -> (f32, f32) {
    ((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32)
}

/// Source texel a destination texel is anchored at.
#[inline]
fn base(x: u32, dst: u32, src: u32) -> i64 {
    (x as u64 * src as u64 / dst as u64) as i64
}

#[inline]
fn scale(v: [f32; 4], s: [f32; 4]) -> [f32; 4] {
    std::array::from_fn(|i| v[i] * s[i])
}

fn separable(src: &Surface, bx: i64, by: i64, weights: &[f32], first: i64) -> [f32; 4] {
    let mut acc = [0.0f32; 4];
    for (j, wy) in weights.iter().enumerate() {
        for (i, wx) in weights.iter().enumerate() {
            let t = src.fetch(bx + i as i64 + first, by + j as i64 + first);
            let w = wx * wy;
            for c in 0..4 {
                acc[c] += t[c] * w;
            }
        }
    }
    acc
}

fn variance_value(t: [f32; 4], source: VarianceSource) -> f32 {
    match source {
        VarianceSource::X => t[0],
        VarianceSource::Y => t[1],
        VarianceSource::Z => t[2],
        VarianceSource::W => t[3],
        VarianceSource::Luminance | VarianceSource::Accumulate => luminance(t),
    }
}

fn variance_block(src: &Surface, bx: i64, by: i64, source: VarianceSource) -> [f32; 4] {
    let block = [
        src.fetch(bx, by),
        src.fetch(bx + 1, by),
        src.fetch(bx, by + 1),
        src.fetch(bx + 1, by + 1),
    ];
    if source == VarianceSource::Accumulate {
        let mean = block.iter().map(|t| t[0]).sum::<f32>() * 0.25;
        let mean_sq = block.iter().map(|t| t[0] * t[0]).sum::<f32>() * 0.25;
        let within = block.iter().map(|t| t[1]).sum::<f32>() * 0.25;
        return [mean, within + (mean_sq - mean * mean).max(0.0), 0.0, 1.0];
    }
    let values = block.map(|t| variance_value(t, source));
    let mean = values.iter().sum::<f32>() * 0.25;
    let mean_sq = values.iter().map(|v| v * v).sum::<f32>() * 0.25;
    [mean, (mean_sq - mean * mean).max(0.0), 0.0, 1.0]
}

/// Evaluate a single-level op into a `width x height` destination.
pub(crate) fn evaluate(op: &BlitOp, src: &Surface, width: u32, height: u32) -> Vec<[f32; 4]> {
    let (sw, sh) = (src.width, src.height);
    match *op {
        BlitOp::Copy | BlitOp::Add | BlitOp::Blend => render(width, height, |x, y| {
            let (u, v) = uv(x, y, width, height);
            src.sample(u, v)
        }),
        BlitOp::Modulate { color, .. } => render(width, height, |x, y| {
            let (u, v) = uv(x, y, width, height);
            scale(src.sample(u, v), color)
        }),
        BlitOp::Gauss4 => render(width, height, |x, y| {
            separable(src, base(x, width, sw), base(y, height, sh), &GAUSS3, -1)
        }),
        BlitOp::Gauss9 => render(width, height, |x, y| {
            separable(src, base(x, width, sw), base(y, height, sh), &GAUSS4_DOWN, -1)
        }),
        BlitOp::Gauss10x10Bilinear => render(width, height, |x, y| {
            separable(src, base(x, width, sw), base(y, height, sh), &GAUSS10_DOWN, -4)
        }),
        BlitOp::LogOfIntensity => render(width, height, |x, y| {
            let (u, v) = uv(x, y, width, height);
            let l = luminance(src.sample(u, v)).max(1e-4).ln();
            [l, l, l, 1.0]
        }),
        BlitOp::VarianceMip { source } => render(width, height, |x, y| {
            variance_block(src, base(x, width, sw), base(y, height, sh), source)
        }),
        BlitOp::Diagnostic { .. } | BlitOp::IntegratePointCloud { .. } => {
            evaluate_chain(op, std::slice::from_ref(src), width, height)
        }
    }
}

/// Evaluate an op reading the whole mip chain of its source.
pub(crate) fn evaluate_chain(op: &BlitOp, chain: &[Surface], width: u32, height: u32) -> Vec<[f32; 4]> {
    let Some(last) = chain.len().checked_sub(1) else {
        return vec![[0.0; 4]; width as usize * height as usize];
    };
    match *op {
        BlitOp::Diagnostic { mip, variance_max } => {
            let mip = mip.clamp(0.0, last as f32);
            let l0 = mip.floor() as usize;
            let l1 = (l0 + 1).min(last);
            let t = mip - l0 as f32;
            let inv = 1.0 / variance_max.max(1e-6);
            render(width, height, |x, y| {
                let (u, v) = uv(x, y, width, height);
                let a = chain[l0].sample(u, v);
                let b = chain[l1].sample(u, v);
                let mut out = [0.0, 0.0, 0.0, 1.0];
                for c in 0..3 {
                    out[c] = ((a[c] + (b[c] - a[c]) * t) * inv).clamp(0.0, 1.0);
                }
                out
            })
        }
        BlitOp::IntegratePointCloud { min_photons } => render(width, height, |x, y| {
            let (u, v) = uv(x, y, width, height);
            let mut texel = [0.0; 4];
            for (level, surface) in chain.iter().enumerate() {
                texel = surface.sample(u, v);
                // w is the mean photon count per base texel; 4^level base texels per footprint
                if texel[3] * (1u64 << (2 * level)) as f32 >= min_photons {
                    break;
                }
            }
            [texel[0], texel[1], texel[2], 1.0]
        }),
        _ => evaluate(op, &chain[0], width, height),
    }
}

//! Compose/tone-map stage.

use crate::config::Exposure;
use crate::gpu::ops::{BlendMode, BlitOp, VarianceSource};
use crate::gpu::{paint_op, GpuBackend, TextureDesc, TextureFormat, TextureId};
use crate::util::{next_pow2, Result};

use super::targets::RenderTargets;

/// Which composition path a frame takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComposeMode {
    /// Paint one (fractional) mip of the accumulation or variance chain
    Diagnostic { mip: f32, variance_max: f32, show_variance: bool },
    /// Running mean of training passes into the training target. With
    /// `accumulate` unset the current mean is shown without folding in a pass.
    Training { pass: u32, detail: f64, accumulate: bool },
    Live { min_photons: f32, exposure: Exposure },
}

/// Produce the final frame into `output`.
#[tracing::instrument(level = "debug", skip(backend, targets))]
pub fn compose_and_present<B: GpuBackend + ?Sized>(
    backend: &mut B,
    targets: &RenderTargets,
    output: TextureId,
    mode: &ComposeMode,
) -> Result<()> {
    let accumulation = targets.accumulation()?;
    let light = targets.light()?;

    let exposure = match *mode {
        ComposeMode::Diagnostic { mip, variance_max, show_variance } => {
            let source = if show_variance { targets.variance()? } else { accumulation };
            let op = BlitOp::Diagnostic { mip, variance_max };
            return paint_op(backend, op, source, output);
        }
        ComposeMode::Training { pass, detail, accumulate } => {
            let training = targets.training()?;
            if accumulate {
                accumulate_training(backend, accumulation, training, pass, detail)?;
            }
            paint_op(backend, BlitOp::Copy, training, light)?;
            1.0
        }
        ComposeMode::Live { min_photons, exposure } => {
            paint_op(backend, BlitOp::IntegratePointCloud { min_photons }, accumulation, light)?;
            match exposure {
                Exposure::Fixed(e) => e,
                Exposure::Auto { key } => auto_exposure(backend, light, key)?,
            }
        }
    };

    paint_op(backend, BlitOp::Copy, targets.material()?, output)?;
    if exposure == 1.0 {
        paint_op(backend, BlitOp::Add, light, output)
    } else {
        let color = [exposure, exposure, exposure, 1.0];
        paint_op(backend, BlitOp::Modulate { color, blend: BlendMode::Additive }, light, output)
    }
}

/// Fold this pass's accumulation into the training running mean.
///
/// Pass 1 is copied as-is. Later passes carry `detail` times the photons, so
/// they are scaled back to single-pass energy and averaged among themselves:
/// after pass `n` the target holds the mean of passes `2..=n`.
pub fn accumulate_training<B: GpuBackend + ?Sized>(
    backend: &mut B,
    accumulation: TextureId,
    training: TextureId,
    pass: u32,
    detail: f64,
) -> Result<()> {
    if pass <= 1 {
        return backend.paint(&BlitOp::Copy, accumulation.level(0), training.level(0), BlendMode::Replace);
    }
    let n = (pass - 1) as f64;
    let scale = (1.0 / (detail.max(f64::EPSILON) * n)) as f32;
    let retain = (1.0 - 1.0 / n) as f32;
    backend.paint(
        &BlitOp::Modulate { color: [scale; 4], blend: BlendMode::AddDecayed { retain } },
        accumulation.level(0),
        training.level(0),
        BlendMode::AddDecayed { retain },
    )
}

/// Exposure mapping the log-average luminance of `light` to `key`.
pub fn auto_exposure<B: GpuBackend + ?Sized>(backend: &mut B, light: TextureId, key: f32) -> Result<f32> {
    let (w, h) = backend
        .texture_desc(light)
        .map(|d| (d.width, d.height))
        .unwrap_or((1, 1));
    let desc = TextureDesc::new("Log Luminance", next_pow2(w), next_pow2(h), TextureFormat::Rgba32Float)
        .with_full_mip_chain();
    let last = desc.mip_levels - 1;
    let scratch = backend.create_texture(&desc)?;

    let reduce = |backend: &mut B| -> Result<f32> {
        paint_op(backend, BlitOp::LogOfIntensity, light, scratch)?;
        // 2x2 box means; the first step seeds x with the log, later ones merge
        for level in 0..last {
            let source = if level == 0 { VarianceSource::X } else { VarianceSource::Accumulate };
            paint_op(backend, BlitOp::VarianceMip { source }, scratch.level(level), scratch.level(level + 1))?;
        }
        let mean_log = backend.read_texture(scratch, last)?.get(0, 0)[0];
        Ok(key / mean_log.exp())
    };
    let result = reduce(backend);
    backend.release_texture(scratch)?;
    let exposure = result?;
    tracing::trace!(exposure, "auto exposure");
    Ok(if exposure.is_finite() { exposure } else { 1.0 })
}

//! Trace/integrate stage.
//!
//! `trace` runs the two compute kernels that turn uploaded rays into the
//! accumulation texture's base level. The `integrate*` functions then build
//! its mip chain, which the point-cloud integration in the compose stage
//! reads to pick a per-pixel filter footprint.

use crate::gpu::ops::{BlendMode, BlitOp, VarianceSource};
use crate::gpu::{
    paint_op, ConvertBindings, GpuBackend, KernelSet, TextureDesc, TextureId, TraceBindings, CONVERT_TILE,
    TRACE_GROUP_SIZE,
};
use crate::util::{ndc_to_pixel, Result};

use super::camera::Camera2D;
use super::emission::RayBuffer;
use super::targets::RenderTargets;

/// Run `f` with a transient texture, releasing it on every exit path.
fn with_scratch<B, F>(backend: &mut B, desc: &TextureDesc, f: F) -> Result<()>
where
    B: GpuBackend + ?Sized,
    F: FnOnce(&mut B, TextureId) -> Result<()>,
{
    let scratch = backend.create_texture(desc)?;
    let result = f(backend, scratch);
    let released = backend.release_texture(scratch);
    result.and(released)
}

/// Dispatch the trace and convert kernels for `ray_count` uploaded rays.
#[tracing::instrument(level = "debug", skip(backend, targets, camera, rays))]
pub fn trace<B: GpuBackend + ?Sized>(
    backend: &mut B,
    targets: &RenderTargets,
    camera: &Camera2D,
    rays: &RayBuffer,
    ray_count: usize,
    kernels: KernelSet,
) -> Result<()> {
    let Some(ray_buffer) = rays.buffer() else {
        return Ok(());
    };
    if ray_count == 0 {
        return Ok(());
    }
    let (width, height) = targets.accumulation_size();
    let outscatter = targets.accumulation()?;
    let atomic = targets.atomic()?;

    // G-buffer writes must land before the kernel samples them
    backend.submit();

    if kernels.trace {
        let bindings = TraceBindings {
            outscatter,
            gbuffer_material: targets.material()?,
            gbuffer_structure: targets.structure()?,
            rays: ray_buffer,
            ray_count: ray_count as u32,
            atomic,
            atomic_width: width,
            world_to_screen: camera.world_to_screen(),
            screen_to_pixel: ndc_to_pixel(width, height),
        };
        let groups = (ray_count as u32).div_ceil(TRACE_GROUP_SIZE);
        backend.dispatch_trace(&bindings, [groups, 1, 1])?;
    }

    if kernels.convert {
        let bindings = ConvertBindings { atomic, outscatter, width, height };
        backend.dispatch_convert(
            &bindings,
            [width.div_ceil(CONVERT_TILE), height.div_ceil(CONVERT_TILE), 1],
        )?;
    }
    Ok(())
}

/// Gaussian mip chain: per level a same-size blur then a 2x downsample.
#[tracing::instrument(level = "debug", skip_all)]
pub fn integrate<B: GpuBackend + ?Sized>(backend: &mut B, targets: &RenderTargets) -> Result<()> {
    let accumulation = targets.accumulation()?;
    let mips = targets.mip_levels();
    let desc = targets.accumulation_desc().with_label("Outscatter Scratch");
    with_scratch(backend, &desc, |backend, scratch| {
        for i in 0..mips.saturating_sub(1) {
            paint_op(backend, BlitOp::Gauss4, accumulation.level(i), scratch.level(i))?;
            paint_op(backend, BlitOp::Gauss9, scratch.level(i), accumulation.level(i + 1))?;
        }
        Ok(())
    })
}

/// Alternate mip chain using a single 10x10 binomial downsample per level.
#[tracing::instrument(level = "debug", skip_all)]
pub fn integrate_bilinear<B: GpuBackend + ?Sized>(backend: &mut B, targets: &RenderTargets) -> Result<()> {
    let accumulation = targets.accumulation()?;
    let mips = targets.mip_levels();
    let desc = targets.accumulation_desc().with_label("Outscatter Scratch");
    with_scratch(backend, &desc, |backend, scratch| {
        for i in 0..mips.saturating_sub(1) {
            paint_op(backend, BlitOp::Copy, accumulation.level(i), scratch.level(i))?;
            paint_op(backend, BlitOp::Gauss10x10Bilinear, scratch.level(i), accumulation.level(i + 1))?;
        }
        Ok(())
    })
}

/// Variance mip chain into the variance texture, up to `mip_max` levels.
#[tracing::instrument(level = "debug", skip(backend, targets))]
pub fn integrate_variance<B: GpuBackend + ?Sized>(
    backend: &mut B,
    targets: &RenderTargets,
    source: VarianceSource,
    mip_max: u32,
) -> Result<()> {
    let accumulation = targets.accumulation()?;
    let variance = targets.variance()?;
    let last = mip_max.min(targets.mip_levels().saturating_sub(1));
    if last == 0 {
        return Ok(());
    }

    paint_op(backend, BlitOp::VarianceMip { source }, accumulation.level(0), variance.level(1))?;

    let desc = targets.accumulation_desc().with_label("Outscatter Variance Scratch");
    with_scratch(backend, &desc, |backend, scratch| {
        for i in 1..last {
            let merge = BlitOp::VarianceMip { source: VarianceSource::Accumulate };
            paint_op(backend, merge, variance.level(i), scratch.level(i + 1))?;
            backend.paint(&BlitOp::Copy, scratch.level(i + 1), variance.level(i + 1), BlendMode::Replace)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::cpu::CpuBackend;
    use crate::gpu::KernelSet;
    use crate::light::EmittedRay;

    fn setup(size: u32) -> (CpuBackend, RenderTargets) {
        let mut gpu = CpuBackend::new();
        let mut targets = RenderTargets::new();
        targets.ensure_targets(&mut gpu, size, size, false).unwrap();
        targets.clear_and_bind(&mut gpu, [0.0; 4]).unwrap();
        (gpu, targets)
    }

    #[test]
    fn test_trace_group_counts() {
        let (mut gpu, targets) = setup(64);
        let kernels = gpu.resolve_kernels();
        let mut rays = RayBuffer::new(1024);
        let region = rays.begin_write(300);
        region.fill(EmittedRay::new([0.0, 0.0], [1.0, 1.0, 1.0, 1.0]));
        rays.end_write(&mut gpu, 300).unwrap();

        trace(&mut gpu, &targets, &Camera2D::new(64, 64), &rays, 300, kernels).unwrap();
        let c = gpu.counters();
        assert_eq!((c.trace_dispatches, c.convert_dispatches), (1, 1));
        assert_eq!(c.last_trace_deposits, 300);
        assert!(c.submits >= 1);

        let acc = gpu.read_texture(targets.accumulation().unwrap(), 0).unwrap();
        assert!((acc.channel_sums()[3] - 300.0).abs() < 1e-3);
    }

    #[test]
    fn test_trace_skips_missing_kernels() {
        let (mut gpu, targets) = setup(16);
        gpu.resolve_kernels();
        let mut rays = RayBuffer::new(16);
        rays.begin_write(4);
        rays.end_write(&mut gpu, 4).unwrap();
        trace(&mut gpu, &targets, &Camera2D::new(16, 16), &rays, 4, KernelSet::default()).unwrap();
        assert_eq!(gpu.counters().trace_dispatches, 0);
    }

    #[test]
    fn test_integrate_paint_sequence_and_scratch_release() {
        let (mut gpu, targets) = setup(8);
        let live = gpu.stats().live_textures();
        integrate(&mut gpu, &targets).unwrap();
        let log = gpu.take_paint_log();
        assert_eq!(log.len(), 2 * 3);
        assert_eq!(&log[..2], &["gauss4", "gauss9"]);
        assert_eq!(gpu.stats().live_textures(), live);
    }

    #[test]
    fn test_integrate_preserves_photon_mean() {
        let (mut gpu, targets) = setup(8);
        let acc = targets.accumulation().unwrap();
        gpu.fill_rect(acc, 0, 0, 8, 8, [0.0, 0.0, 0.0, 2.0]).unwrap();
        integrate(&mut gpu, &targets).unwrap();
        let top = gpu.read_texture(acc, 3).unwrap();
        assert!((top.get(0, 0)[3] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_variance_chain_clamped() {
        let (mut gpu, targets) = setup(8);
        integrate_variance(&mut gpu, &targets, VarianceSource::W, 10).unwrap();
        // level 1 from accumulation, then merge + copy for levels 2 and 3
        assert_eq!(gpu.take_paint_log().len(), 1 + 2 * 2);
    }
}

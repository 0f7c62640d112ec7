//! Software reference backend.
//!
//! Implements every [`GpuBackend`] operation on the CPU with the same
//! numerical contract as the wgpu backend: formats are stored at their real
//! precision (`half::f16` for `Rgba16Float`, 8-bit for the unorm formats),
//! paints run row-parallel on rayon and the kernels mirror the WGSL sources.
//!
//! Besides tests and the headless CLI, the backend is useful to reproduce
//! out-of-memory and missing-kernel conditions: see
//! [`CpuBackend::with_memory_budget`] and [`CpuBackend::with_kernels`].

mod kernels;
pub(crate) mod ops;

use std::collections::HashMap;

use half::f16;
use smallvec::SmallVec;

use super::ops::{BlendMode, BlitOp};
use super::{
    BoundTargets, BufferId, ConvertBindings, GpuBackend, KernelSet, ResourceStats, TextureDesc,
    TextureFormat, TextureId, TextureLevel, TraceBindings,
};
use crate::light::EmittedRay;
use crate::util::{Error, FloatImage, Result};
use ops::Surface;

/// Texel storage at the texture format's precision, one `Vec` per mip level.
#[derive(Debug)]
enum Levels {
    F32(Vec<Vec<[f32; 4]>>),
    F16(Vec<Vec<[f16; 4]>>),
    /// Stored in memory order: BGRA for `Bgra8Unorm`
    Unorm8 { bgra: bool, levels: Vec<Vec<[u8; 4]>> },
    U32(Vec<Vec<u32>>),
}

#[inline]
fn to_unorm(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

#[derive(Debug)]
struct CpuTexture {
    desc: TextureDesc,
    levels: Levels,
}

impl CpuTexture {
    fn new(desc: TextureDesc) -> Self {
        let sizes: Vec<usize> = (0..desc.mip_levels)
            .map(|l| {
                let (w, h) = desc.extent(l);
                w as usize * h as usize
            })
            .collect();
        let levels = match desc.format {
            TextureFormat::Rgba32Float => Levels::F32(sizes.iter().map(|&n| vec![[0.0; 4]; n]).collect()),
            TextureFormat::Rgba16Float => {
                Levels::F16(sizes.iter().map(|&n| vec![[f16::ZERO; 4]; n]).collect())
            }
            TextureFormat::Bgra8Unorm | TextureFormat::Rgba8Unorm => Levels::Unorm8 {
                bgra: desc.format == TextureFormat::Bgra8Unorm,
                levels: sizes.iter().map(|&n| vec![[0; 4]; n]).collect(),
            },
            // the 4-wide layout already lives in desc.width
            TextureFormat::R32Uint => Levels::U32(sizes.iter().map(|&n| vec![0; n]).collect()),
        };
        Self { desc, levels }
    }

    fn check_level(&self, level: u32) -> Result<()> {
        if level >= self.desc.mip_levels {
            return Err(Error::MipOutOfRange { level, count: self.desc.mip_levels });
        }
        Ok(())
    }

    fn surface(&self, level: u32) -> Surface {
        let (width, height) = self.desc.extent(level);
        let l = level as usize;
        let pixels = match &self.levels {
            Levels::F32(levels) => levels[l].clone(),
            Levels::F16(levels) => levels[l].iter().map(|t| t.map(f16::to_f32)).collect(),
            Levels::Unorm8 { bgra, levels } => levels[l]
                .iter()
                .map(|t| {
                    let t = t.map(|v| v as f32 / 255.0);
                    if *bgra { [t[2], t[1], t[0], t[3]] } else { t }
                })
                .collect(),
            Levels::U32(levels) => levels[l].iter().map(|&v| [v as f32, 0.0, 0.0, 1.0]).collect(),
        };
        Surface { width, height, pixels }
    }

    fn store(&mut self, level: u32, pixels: &[[f32; 4]]) {
        let l = level as usize;
        match &mut self.levels {
            Levels::F32(levels) => levels[l].copy_from_slice(pixels),
            Levels::F16(levels) => {
                for (dst, src) in levels[l].iter_mut().zip(pixels) {
                    *dst = src.map(f16::from_f32);
                }
            }
            Levels::Unorm8 { bgra, levels } => {
                for (dst, src) in levels[l].iter_mut().zip(pixels) {
                    let s = if *bgra { [src[2], src[1], src[0], src[3]] } else { *src };
                    *dst = s.map(to_unorm);
                }
            }
            Levels::U32(levels) => {
                for (dst, src) in levels[l].iter_mut().zip(pixels) {
                    *dst = src[0].max(0.0) as u32;
                }
            }
        }
    }

    fn clear(&mut self, color: [f32; 4]) {
        for level in 0..self.desc.mip_levels {
            let (w, h) = self.desc.extent(level);
            let fill = vec![color; w as usize * h as usize];
            self.store(level, &fill);
        }
    }
}

#[derive(Debug)]
struct CpuRayBuffer {
    capacity: usize,
    rays: Vec<EmittedRay>,
}

/// Command counters exposed for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandCounters {
    pub paints: u64,
    pub trace_dispatches: u64,
    pub convert_dispatches: u64,
    pub submits: u64,
    /// Rays the last trace dispatch deposited
    pub last_trace_deposits: u64,
}

/// Software implementation of [`GpuBackend`].
#[derive(Debug)]
pub struct CpuBackend {
    textures: HashMap<u32, CpuTexture>,
    buffers: HashMap<u32, CpuRayBuffer>,
    next_id: u32,
    bound: BoundTargets,
    available: KernelSet,
    resolved: KernelSet,
    memory_budget: Option<u64>,
    stats: ResourceStats,
    counters: CommandCounters,
    paint_log: Vec<&'static str>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 1,
            bound: SmallVec::new(),
            available: KernelSet::ALL,
            resolved: KernelSet::default(),
            memory_budget: None,
            stats: ResourceStats::default(),
            counters: CommandCounters::default(),
            paint_log: Vec::new(),
        }
    }

    /// Fail allocations once live resources would exceed `bytes`.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Restrict which kernels `resolve_kernels` can find.
    pub fn with_kernels(mut self, kernels: KernelSet) -> Self {
        self.available = kernels;
        self
    }

    pub fn counters(&self) -> CommandCounters {
        self.counters
    }

    /// Names of the ops painted since the last call.
    pub fn take_paint_log(&mut self) -> Vec<&'static str> {
        std::mem::take(&mut self.paint_log)
    }

    /// Raw contents of an `R32Uint` texture's first level.
    pub fn atomic_values(&self, id: TextureId) -> Result<&[u32]> {
        match &self.texture(id)?.levels {
            Levels::U32(levels) => Ok(&levels[0]),
            _ => Err(Error::FormatMismatch {
                expected: TextureFormat::R32Uint.name().into(),
                actual: self.texture(id)?.desc.format.name().into(),
            }),
        }
    }

    /// Write `value` into the pixel rectangle `[x0, x1) x [y0, y1)` of level 0.
    ///
    /// The rectangle is clipped to the texture.
    pub fn fill_rect(&mut self, id: TextureId, x0: i32, y0: i32, x1: i32, y1: i32, value: [f32; 4]) -> Result<()> {
        let tex = self.texture_mut(id)?;
        let (w, h) = (tex.desc.width as i32, tex.desc.height as i32);
        let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
        let (y0, y1) = (y0.clamp(0, h), y1.clamp(0, h));
        if x0 >= x1 || y0 >= y1 {
            return Ok(());
        }
        let mut surface = tex.surface(0);
        for y in y0..y1 {
            let row = (y * w) as usize;
            surface.pixels[row + x0 as usize..row + x1 as usize].fill(value);
        }
        tex.store(0, &surface.pixels);
        Ok(())
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn reserve(&mut self, label: &str, bytes: u64) -> Result<()> {
        if let Some(budget) = self.memory_budget {
            if self.stats.bytes_live + bytes > budget {
                return Err(Error::oom(label, bytes));
            }
        }
        self.stats.bytes_live += bytes;
        Ok(())
    }

    fn texture(&self, id: TextureId) -> Result<&CpuTexture> {
        self.textures.get(&id.0).ok_or(Error::UnknownTexture(id.0))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut CpuTexture> {
        self.textures.get_mut(&id.0).ok_or(Error::UnknownTexture(id.0))
    }

    fn color_texture(&self, id: TextureId) -> Result<&CpuTexture> {
        let tex = self.texture(id)?;
        if !tex.desc.format.is_color() {
            return Err(Error::FormatMismatch {
                expected: "color format".into(),
                actual: tex.desc.format.name().into(),
            });
        }
        Ok(tex)
    }
}

impl GpuBackend for CpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidDimensions { width: desc.width, height: desc.height });
        }
        self.reserve(&desc.label, desc.byte_size())?;
        let id = self.alloc_id();
        self.textures.insert(id, CpuTexture::new(desc.clone()));
        self.stats.textures_created += 1;
        tracing::trace!(id, label = %desc.label, w = desc.width, h = desc.height, "create texture");
        Ok(TextureId(id))
    }

    fn release_texture(&mut self, id: TextureId) -> Result<()> {
        let tex = self.textures.remove(&id.0).ok_or(Error::UnknownTexture(id.0))?;
        self.stats.bytes_live -= tex.desc.byte_size();
        self.stats.textures_released += 1;
        self.bound.retain(|t| *t != id);
        Ok(())
    }

    fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&id.0).map(|t| &t.desc)
    }

    fn create_ray_buffer(&mut self, label: &str, capacity: usize) -> Result<BufferId> {
        let bytes = (capacity * std::mem::size_of::<EmittedRay>()) as u64;
        self.reserve(label, bytes)?;
        let id = self.alloc_id();
        self.buffers.insert(id, CpuRayBuffer { capacity, rays: Vec::new() });
        self.stats.buffers_created += 1;
        Ok(BufferId(id))
    }

    fn release_buffer(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.buffers.remove(&id.0).ok_or(Error::UnknownBuffer(id.0))?;
        self.stats.bytes_live -= (buffer.capacity * std::mem::size_of::<EmittedRay>()) as u64;
        self.stats.buffers_released += 1;
        Ok(())
    }

    fn write_rays(&mut self, id: BufferId, rays: &[EmittedRay]) -> Result<()> {
        let buffer = self.buffers.get_mut(&id.0).ok_or(Error::UnknownBuffer(id.0))?;
        if rays.len() > buffer.capacity {
            return Err(Error::RayBufferOverflow { count: rays.len(), capacity: buffer.capacity });
        }
        buffer.rays.clear();
        buffer.rays.extend_from_slice(rays);
        Ok(())
    }

    fn clear_texture(&mut self, id: TextureId, color: [f32; 4]) -> Result<()> {
        self.texture_mut(id)?.clear(color);
        Ok(())
    }

    fn bind_render_targets(&mut self, targets: &[TextureId]) -> Result<()> {
        for id in targets {
            self.color_texture(*id)?;
        }
        self.bound = targets.iter().copied().collect();
        Ok(())
    }

    fn bound_targets(&self) -> &[TextureId] {
        &self.bound
    }

    fn paint(&mut self, op: &BlitOp, src: TextureLevel, dst: TextureLevel, blend: BlendMode) -> Result<()> {
        let source = self.color_texture(src.texture)?;
        source.check_level(src.level)?;
        let target = self.color_texture(dst.texture)?;
        target.check_level(dst.level)?;
        let (dw, dh) = target.desc.extent(dst.level);

        let out = if op.reads_mip_chain() {
            let chain: Vec<Surface> = (0..source.desc.mip_levels).map(|l| source.surface(l)).collect();
            ops::evaluate_chain(op, &chain, dw, dh)
        } else {
            ops::evaluate(op, &source.surface(src.level), dw, dh)
        };

        let target = self.texture_mut(dst.texture)?;
        let result = match blend {
            BlendMode::Replace => out,
            _ => {
                let mut existing = target.surface(dst.level).pixels;
                for (d, s) in existing.iter_mut().zip(&out) {
                    *d = blend.apply(*s, *d);
                }
                existing
            }
        };
        target.store(dst.level, &result);
        self.counters.paints += 1;
        self.paint_log.push(op.name());
        Ok(())
    }

    fn resolve_kernels(&mut self) -> KernelSet {
        self.resolved = self.available;
        self.resolved
    }

    fn dispatch_trace(&mut self, bindings: &TraceBindings, groups: [u32; 3]) -> Result<()> {
        if !self.resolved.trace {
            return Err(Error::Unsupported(super::KERNEL_TRACE.into()));
        }
        let structure = self.color_texture(bindings.gbuffer_structure)?.surface(0);
        self.color_texture(bindings.gbuffer_material)?;
        self.color_texture(bindings.outscatter)?;
        let rays = self
            .buffers
            .get(&bindings.rays.0)
            .ok_or(Error::UnknownBuffer(bindings.rays.0))?
            .rays
            .clone();
        let atomic_tex = self.texture_mut(bindings.atomic)?;
        let height = atomic_tex.desc.height;
        let Levels::U32(levels) = &mut atomic_tex.levels else {
            return Err(Error::FormatMismatch {
                expected: TextureFormat::R32Uint.name().into(),
                actual: atomic_tex.desc.format.name().into(),
            });
        };
        let deposited = kernels::trace(&rays, bindings, groups, Some(&structure), &mut levels[0], height);
        self.counters.trace_dispatches += 1;
        self.counters.last_trace_deposits = deposited as u64;
        Ok(())
    }

    fn dispatch_convert(&mut self, bindings: &ConvertBindings, groups: [u32; 3]) -> Result<()> {
        if !self.resolved.convert {
            return Err(Error::Unsupported(super::KERNEL_CONVERT_OUTSCATTER.into()));
        }
        let atomic = self.atomic_values(bindings.atomic)?.to_vec();
        let target = self.texture_mut(bindings.outscatter)?;
        let mut surface = target.surface(0);
        kernels::convert(&atomic, bindings.width, bindings.height, groups, &mut surface.pixels);
        target.store(0, &surface.pixels);
        self.counters.convert_dispatches += 1;
        Ok(())
    }

    fn submit(&mut self) {
        self.counters.submits += 1;
    }

    fn read_texture(&mut self, id: TextureId, level: u32) -> Result<FloatImage> {
        self.submit();
        let tex = self.texture(id)?;
        tex.check_level(level)?;
        let surface = tex.surface(level);
        FloatImage::from_pixels(surface.width, surface.height, surface.pixels)
    }

    fn stats(&self) -> ResourceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::paint_op;

    #[test]
    fn test_create_release_accounting() {
        let mut gpu = CpuBackend::new();
        let desc = TextureDesc::new("t", 8, 8, TextureFormat::Rgba32Float).with_full_mip_chain();
        let id = gpu.create_texture(&desc).unwrap();
        assert_eq!(gpu.stats().bytes_live, desc.byte_size());
        gpu.release_texture(id).unwrap();
        assert_eq!(gpu.stats().bytes_live, 0);
        assert!(matches!(gpu.release_texture(id), Err(Error::UnknownTexture(_))));
    }

    #[test]
    fn test_memory_budget_oom() {
        let mut gpu = CpuBackend::new().with_memory_budget(1024);
        let small = TextureDesc::new("small", 4, 4, TextureFormat::Rgba32Float);
        let big = TextureDesc::new("big", 64, 64, TextureFormat::Rgba32Float);
        gpu.create_texture(&small).unwrap();
        assert!(matches!(gpu.create_texture(&big), Err(Error::OutOfMemory { .. })));
    }

    #[test]
    fn test_bgra_roundtrip_and_half_precision() {
        let mut gpu = CpuBackend::new();
        let bgra = gpu.create_texture(&TextureDesc::new("m", 2, 2, TextureFormat::Bgra8Unorm)).unwrap();
        gpu.clear_texture(bgra, [1.0, 0.5, 0.0, 1.0]).unwrap();
        let img = gpu.read_texture(bgra, 0).unwrap();
        assert_eq!(img.get(1, 1)[0], 1.0);
        assert!((img.get(1, 1)[1] - 0.5).abs() < 1.0 / 255.0);

        let half = gpu.create_texture(&TextureDesc::new("s", 1, 1, TextureFormat::Rgba16Float)).unwrap();
        gpu.clear_texture(half, [0.1, 2.0, 1000.0, 0.0]).unwrap();
        let img = gpu.read_texture(half, 0).unwrap();
        assert!((img.get(0, 0)[0] - 0.1).abs() < 1e-3);
        assert_eq!(img.get(0, 0)[2], 1000.0);
    }

    #[test]
    fn test_paint_additive_between_levels() {
        let mut gpu = CpuBackend::new();
        let desc = TextureDesc::new("acc", 4, 4, TextureFormat::Rgba32Float).with_full_mip_chain();
        let a = gpu.create_texture(&desc).unwrap();
        gpu.clear_texture(a, [1.0; 4]).unwrap();
        paint_op(&mut gpu, BlitOp::Gauss9, a.level(0), a.level(1)).unwrap();
        paint_op(&mut gpu, BlitOp::Add, a.level(1), a.level(1)).unwrap();
        let img = gpu.read_texture(a, 1).unwrap();
        assert_eq!(img.width, 2);
        assert!((img.get(0, 0)[0] - 2.0).abs() < 1e-5);
        assert_eq!(gpu.take_paint_log(), vec!["gauss9", "add"]);
    }

    #[test]
    fn test_fill_rect_clips() {
        let mut gpu = CpuBackend::new();
        let t = gpu.create_texture(&TextureDesc::new("t", 4, 4, TextureFormat::Rgba32Float)).unwrap();
        gpu.fill_rect(t, -2, 2, 10, 3, [1.0; 4]).unwrap();
        let img = gpu.read_texture(t, 0).unwrap();
        assert_eq!(img.channel_sums()[0], 4.0);
    }

    #[test]
    fn test_dispatch_requires_resolved_kernel() {
        let mut gpu = CpuBackend::new().with_kernels(KernelSet { trace: false, convert: true });
        let kernels = gpu.resolve_kernels();
        assert!(!kernels.trace && kernels.convert);
    }
}

//! GPU backend abstraction.
//!
//! The renderer talks to the device exclusively through [`GpuBackend`]:
//! texture/buffer lifetime, full-surface paints from the [`ops`] registry,
//! the two compute kernels and readback. Two implementations ship:
//!
//! - [`cpu::CpuBackend`] - software reference; deterministic, used by tests
//!   and the headless CLI
//! - `wgpu_backend::WgpuBackend` - real device (feature `gpu`)
//!
//! Handles are plain ids. Releasing a handle twice, or using a released one,
//! is reported as [`Error::UnknownTexture`](crate::util::Error::UnknownTexture)
//! rather than touching freed memory.

pub mod cpu;
pub mod ops;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

use smallvec::SmallVec;

use crate::light::EmittedRay;
use crate::util::{mip_count, mip_extent, FloatImage, Mat4, Result};
use ops::{BlendMode, BlitOp};

/// Entry point name of the photon trace kernel.
pub const KERNEL_TRACE: &str = "Kernel_Trace";
/// Entry point name of the atomic-to-texture convert kernel.
pub const KERNEL_CONVERT_OUTSCATTER: &str = "Kernel_ConvertOutscatter";

/// Threads per trace workgroup (one ray each).
pub const TRACE_GROUP_SIZE: u32 = 256;
/// Pixels per side of one convert tile.
pub const CONVERT_TILE: u32 = 32;

/// Fixed-point scale of the atomic accumulation surface.
pub const ATOMIC_FIXED_POINT_SCALE: f32 = 65536.0;

/// Opaque texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

impl TextureId {
    /// Address one mip level of this texture.
    #[inline]
    pub fn level(self, level: u32) -> TextureLevel {
        TextureLevel { texture: self, level }
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One mip level of a texture, the unit every paint reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureLevel {
    pub texture: TextureId,
    pub level: u32,
}

impl From<TextureId> for TextureLevel {
    fn from(texture: TextureId) -> Self {
        texture.level(0)
    }
}

/// Texture formats the renderer allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba32Float,
    Rgba16Float,
    Bgra8Unorm,
    Rgba8Unorm,
    R32Uint,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba32Float => 16,
            Self::Rgba16Float => 8,
            Self::Bgra8Unorm | Self::Rgba8Unorm | Self::R32Uint => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgba32Float => "Rgba32Float",
            Self::Rgba16Float => "Rgba16Float",
            Self::Bgra8Unorm => "Bgra8Unorm",
            Self::Rgba8Unorm => "Rgba8Unorm",
            Self::R32Uint => "R32Uint",
        }
    }

    /// Whether blit ops can sample and paint this format.
    pub fn is_color(self) -> bool {
        !matches!(self, Self::R32Uint)
    }
}

/// Texture creation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    /// Writable from compute kernels
    pub random_write: bool,
}

impl TextureDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            mip_levels: 1,
            random_write: false,
        }
    }

    /// Full chain down to 1x1.
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = mip_count(self.width, self.height);
        self
    }

    pub fn with_random_write(mut self, enable: bool) -> Self {
        self.random_write = enable;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn extent(&self, level: u32) -> (u32, u32) {
        mip_extent(self.width, self.height, level)
    }

    /// Bytes across every mip level.
    pub fn byte_size(&self) -> u64 {
        (0..self.mip_levels)
            .map(|l| {
                let (w, h) = self.extent(l);
                w as u64 * h as u64 * self.format.bytes_per_pixel() as u64
            })
            .sum()
    }
}

/// Which compute kernels the backend resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelSet {
    pub trace: bool,
    pub convert: bool,
}

impl KernelSet {
    pub const ALL: Self = Self { trace: true, convert: true };
}

/// Inputs of `Kernel_Trace`.
#[derive(Debug, Clone, Copy)]
pub struct TraceBindings {
    /// Accumulation texture (random-write)
    pub outscatter: TextureId,
    pub gbuffer_material: TextureId,
    pub gbuffer_structure: TextureId,
    pub rays: BufferId,
    pub ray_count: u32,
    /// `R32Uint` atomic surface, `4 * width` texels wide
    pub atomic: TextureId,
    /// Pixel width of the accumulation image the atomic surface mirrors
    pub atomic_width: u32,
    pub world_to_screen: Mat4,
    pub screen_to_pixel: Mat4,
}

/// Inputs of `Kernel_ConvertOutscatter`.
#[derive(Debug, Clone, Copy)]
pub struct ConvertBindings {
    pub atomic: TextureId,
    pub outscatter: TextureId,
    pub width: u32,
    pub height: u32,
}

/// Allocation counters, for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub textures_created: u64,
    pub textures_released: u64,
    pub buffers_created: u64,
    pub buffers_released: u64,
    /// Bytes held by live resources
    pub bytes_live: u64,
}

impl ResourceStats {
    pub fn live_textures(&self) -> u64 {
        self.textures_created - self.textures_released
    }

    pub fn live_buffers(&self) -> u64 {
        self.buffers_created - self.buffers_released
    }
}

/// Bound multi-target output (light, material, structure).
pub type BoundTargets = SmallVec<[TextureId; 4]>;

/// Device operations the renderer needs.
pub trait GpuBackend {
    /// Allocate a texture. Allocation failure is `Error::OutOfMemory`.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    fn release_texture(&mut self, id: TextureId) -> Result<()>;

    fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc>;

    /// Allocate a ray buffer holding up to `capacity` rays.
    fn create_ray_buffer(&mut self, label: &str, capacity: usize) -> Result<BufferId>;

    fn release_buffer(&mut self, id: BufferId) -> Result<()>;

    /// Upload rays to the front of a ray buffer.
    fn write_rays(&mut self, buffer: BufferId, rays: &[EmittedRay]) -> Result<()>;

    /// Clear every mip level. For `R32Uint` only `color[0]` is used.
    fn clear_texture(&mut self, id: TextureId, color: [f32; 4]) -> Result<()>;

    /// Make `targets` the active multi-target output for scene drawing.
    fn bind_render_targets(&mut self, targets: &[TextureId]) -> Result<()>;

    fn bound_targets(&self) -> &[TextureId];

    /// Full-surface paint of `op` from `src` into `dst` with `blend`.
    fn paint(&mut self, op: &BlitOp, src: TextureLevel, dst: TextureLevel, blend: BlendMode) -> Result<()>;

    /// Resolve compute kernels; called once at setup and after kernel reloads.
    fn resolve_kernels(&mut self) -> KernelSet;

    fn dispatch_trace(&mut self, bindings: &TraceBindings, groups: [u32; 3]) -> Result<()>;

    fn dispatch_convert(&mut self, bindings: &ConvertBindings, groups: [u32; 3]) -> Result<()>;

    /// Flush recorded work to the device.
    fn submit(&mut self);

    /// Read back one mip level as RGBA32F (implies `submit`).
    fn read_texture(&mut self, id: TextureId, level: u32) -> Result<FloatImage>;

    fn stats(&self) -> ResourceStats;
}

/// Paint with the op's own blend mode.
pub fn paint_op<B: GpuBackend + ?Sized>(
    backend: &mut B,
    op: BlitOp,
    src: impl Into<TextureLevel>,
    dst: impl Into<TextureLevel>,
) -> Result<()> {
    backend.paint(&op, src.into(), dst.into(), op.blend())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_full_chain_bytes() {
        let desc = TextureDesc::new("acc", 4, 2, TextureFormat::Rgba32Float).with_full_mip_chain();
        assert_eq!(desc.mip_levels, 3);
        // 4x2 + 2x1 + 1x1 texels
        assert_eq!(desc.byte_size(), (8 + 2 + 1) * 16);
    }

    #[test]
    fn test_level_conversion() {
        let id = TextureId(7);
        let lvl: TextureLevel = id.into();
        assert_eq!(lvl.level, 0);
        assert_eq!(id.level(3).level, 3);
    }
}

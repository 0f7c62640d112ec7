//! Blit operation registry.
//!
//! Every operation is a stateless value describing one full-surface paint from
//! a source mip level into a destination mip level. Backends build the
//! matching pipeline the first time an operation is painted and reuse it for
//! the rest of the renderer's lifetime.
//!
//! Addressing is clamp-to-edge everywhere. Downsampling operations map
//! destination texel `(x, y)` onto source texels around `(2x, 2y)`.

use serde::{Deserialize, Serialize};

/// Channel (or combinator) the variance mip generator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarianceSource {
    X,
    Y,
    Z,
    /// Photon-count channel of the accumulation texture
    W,
    Luminance,
    /// Input texels are already `(mean, variance)` pairs; merge them
    Accumulate,
}

impl VarianceSource {
    /// Index passed to shaders.
    pub fn code(self) -> u32 {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
            Self::W => 3,
            Self::Luminance => 4,
            Self::Accumulate => 5,
        }
    }
}

/// How an operation's output combines with the destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlendMode {
    Replace,
    /// `dst = dst + src`
    Additive,
    /// `dst = src * src.a + dst * (1 - src.a)`
    Alpha,
    /// `dst = src + dst * retain` (running-mean accumulation)
    AddDecayed { retain: f32 },
}

impl BlendMode {
    /// Combine one texel.
    #[inline]
    pub fn apply(self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        match self {
            Self::Replace => src,
            Self::Additive => std::array::from_fn(|c| dst[c] + src[c]),
            Self::Alpha => {
                let a = src[3];
                std::array::from_fn(|c| src[c] * a + dst[c] * (1.0 - a))
            }
            Self::AddDecayed { retain } => std::array::from_fn(|c| src[c] + dst[c] * retain),
        }
    }

    /// Blend discriminant, used for pipeline caching.
    pub fn kind(self) -> u8 {
        match self {
            Self::Replace => 0,
            Self::Additive => 1,
            Self::Alpha => 2,
            Self::AddDecayed { .. } => 3,
        }
    }
}

/// One full-surface paint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlitOp {
    /// Bilinear resample of the source level
    Copy,
    /// Copy with additive blending
    Add,
    /// Copy with alpha blending
    Blend,
    /// Copy scaled by `color`
    Modulate { color: [f32; 4], blend: BlendMode },
    /// Fractional mip of the source chain, divided by `variance_max`, saturated
    Diagnostic { mip: f32, variance_max: f32 },
    /// Same-size 3x3 binomial blur (four bilinear taps)
    Gauss4,
    /// 2x downsample with a 4x4 binomial kernel (nine bilinear taps)
    Gauss9,
    /// 2x downsample with a 10x10 binomial kernel (twenty-five bilinear taps)
    Gauss10x10Bilinear,
    /// Picks, per texel, the finest mip holding at least `min_photons` photons
    IntegratePointCloud { min_photons: f32 },
    /// `ln(max(luminance, 1e-4))` in rgb, alpha 1
    LogOfIntensity,
    /// 2x downsample into `(mean, variance, 0, 1)`
    VarianceMip { source: VarianceSource },
}

/// Operation discriminant; pipelines are cached per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Copy,
    Modulate,
    Diagnostic,
    Gauss4,
    Gauss9,
    Gauss10x10Bilinear,
    IntegratePointCloud,
    LogOfIntensity,
    VarianceMip,
}

impl BlitOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Copy | Self::Add | Self::Blend => OpKind::Copy,
            Self::Modulate { .. } => OpKind::Modulate,
            Self::Diagnostic { .. } => OpKind::Diagnostic,
            Self::Gauss4 => OpKind::Gauss4,
            Self::Gauss9 => OpKind::Gauss9,
            Self::Gauss10x10Bilinear => OpKind::Gauss10x10Bilinear,
            Self::IntegratePointCloud { .. } => OpKind::IntegratePointCloud,
            Self::LogOfIntensity => OpKind::LogOfIntensity,
            Self::VarianceMip { .. } => OpKind::VarianceMip,
        }
    }

    pub fn blend(&self) -> BlendMode {
        match self {
            Self::Add => BlendMode::Additive,
            Self::Blend => BlendMode::Alpha,
            Self::Modulate { blend, .. } => *blend,
            _ => BlendMode::Replace,
        }
    }

    /// Whether the op reads the full source chain rather than one level.
    pub fn reads_mip_chain(&self) -> bool {
        matches!(self, Self::Diagnostic { .. } | Self::IntegratePointCloud { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Add => "add",
            Self::Blend => "blend",
            Self::Modulate { .. } => "modulate",
            Self::Diagnostic { .. } => "diagnostic",
            Self::Gauss4 => "gauss4",
            Self::Gauss9 => "gauss9",
            Self::Gauss10x10Bilinear => "gauss10x10",
            Self::IntegratePointCloud { .. } => "integrate_point_cloud",
            Self::LogOfIntensity => "log_intensity",
            Self::VarianceMip { .. } => "variance_mip",
        }
    }

    /// Four floats of op parameters, laid out as the shaders expect them.
    pub fn params(&self) -> [f32; 4] {
        match *self {
            Self::Modulate { color, .. } => color,
            Self::Diagnostic { mip, variance_max } => [mip, variance_max.max(1e-6), 0.0, 0.0],
            Self::IntegratePointCloud { min_photons } => [min_photons, 0.0, 0.0, 0.0],
            Self::VarianceMip { source } => [source.code() as f32, 0.0, 0.0, 0.0],
            _ => [0.0; 4],
        }
    }
}

/// 1D binomial weights `[1, 2, 1] / 4`.
pub const GAUSS3: [f32; 3] = [0.25, 0.5, 0.25];

/// 1D binomial weights `[1, 3, 3, 1] / 8`, taps at offsets -1..=2.
pub const GAUSS4_DOWN: [f32; 4] = [0.125, 0.375, 0.375, 0.125];

/// 1D binomial weights `C(9, k) / 512`, taps at offsets -4..=5.
pub const GAUSS10_DOWN: [f32; 10] = [
    1.0 / 512.0, 9.0 / 512.0, 36.0 / 512.0, 84.0 / 512.0, 126.0 / 512.0,
    126.0 / 512.0, 84.0 / 512.0, 36.0 / 512.0, 9.0 / 512.0, 1.0 / 512.0,
];

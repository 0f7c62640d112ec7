//! Persistent renderer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gpu::ops::VarianceSource;
use crate::training::ConvergenceMetric;
use crate::util::Result;

/// Default ray buffer capacity: 2^22 rays of 32 bytes = 128 MiB, the default
/// wgpu `max_storage_buffer_binding_size`.
pub const DEFAULT_RAY_CAPACITY: usize = 1 << 22;

/// Renderer settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Fixed capacity of the emitted-ray buffer
    pub ray_capacity: usize,
    pub training: TrainingDefaults,
    pub diagnostics: DiagnosticsSettings,
    pub integration: IntegrationSettings,
    pub exposure: Exposure,
}

/// Values the training state falls back to whenever live rendering resumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingDefaults {
    /// Photon multiplier applied on passes after the first
    pub detail: f64,
    /// Exponential smoothing weight of each new frame-delta measurement
    pub frame_delta_bias: f64,
    pub convergence_threshold: f64,
    pub width: u32,
    pub height: u32,
    pub metric: ConvergenceMetric,
}

/// Developer inspection controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Paint a mip of the accumulation texture instead of the composed frame
    pub enable: bool,
    /// Skip emission/trace; keep composing the last accumulation
    pub pause_tracing: bool,
    pub select_mip: f32,  // 0-10
    pub variance_mip_max: f32,  // 1-10
}

/// Mip-chain filter used by the integrate stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MipFilter {
    /// 4-tap blur then 9-tap downsample per level
    Gaussian,
    /// Single 10x10 bilinear Gaussian downsample per level
    Bilinear10x10,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    pub mip_filter: MipFilter,
    /// Photons a mip texel must gather before point-cloud integration trusts it
    pub min_photons: f32,
    /// Build the variance mip chain alongside the Gaussian chain
    pub variance_mips: bool,
    pub variance_source: VarianceSource,
}

/// Exposure applied to the light channel before compositing (live mode only)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Exposure {
    Fixed(f32),
    /// Scale so the log-average light intensity maps to `key`
    Auto { key: f32 },
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            ray_capacity: DEFAULT_RAY_CAPACITY,
            training: TrainingDefaults::default(),
            diagnostics: DiagnosticsSettings::default(),
            integration: IntegrationSettings::default(),
            exposure: Exposure::Fixed(1.0),
        }
    }
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self {
            detail: 100.0,
            frame_delta_bias: 0.1,
            convergence_threshold: 0.001,
            width: 1024,
            height: 1024,
            metric: ConvergenceMetric::RelativeRmsDelta,
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            enable: false,
            pause_tracing: false,
            select_mip: 0.0,
            variance_mip_max: 7.0,
        }
    }
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            mip_filter: MipFilter::Gaussian,
            min_photons: 16.0,
            variance_mips: false,
            variance_source: VarianceSource::W,
        }
    }
}

impl RendererConfig {
    /// Get settings file path
    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("rt2d");
            std::fs::create_dir_all(&p).ok();
            p.push("settings.json");
            p
        })
    }

    /// Location of the persisted settings file, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        Self::path()
    }

    /// Load settings from the user config dir, falling back to defaults
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config.validated())
    }

    /// Save settings to the user config dir (best effort)
    pub fn save(&self) {
        if let Some(path) = Self::path() {
            if let Err(e) = self.save_to(&path) {
                tracing::warn!("failed to save settings to {}: {e}", path.display());
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamp values into the ranges the renderer supports
    pub fn validated(mut self) -> Self {
        self.ray_capacity = self.ray_capacity.max(1);
        self.diagnostics.select_mip = self.diagnostics.select_mip.clamp(0.0, 10.0);
        self.diagnostics.variance_mip_max = self.diagnostics.variance_mip_max.clamp(1.0, 10.0);
        self.training.detail = self.training.detail.max(1.0);
        self.training.frame_delta_bias = self.training.frame_delta_bias.clamp(f64::EPSILON, 1.0);
        self.training.width = self.training.width.max(1);
        self.training.height = self.training.height.max(1);
        self.integration.min_photons = self.integration.min_photons.max(0.0);
        self
    }
}

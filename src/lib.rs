//! # rt2d
//!
//! 2D photon light-transport renderer.
//!
//! Point lights emit photons from area-uniform positions on a disc. The
//! photons are splatted into a fixed-point atomic surface, converted into an
//! accumulation texture and filtered through a Gaussian mip chain, from which
//! point-cloud integration picks a per-pixel footprint. A training mode
//! renders each sample first with a single pass, then with many photon-dense
//! passes folded into a running mean until the image converges, and exports
//! both as an EXR pair.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math helpers, float images
//! - [`config`] - Persistent renderer settings
//! - [`gpu`] - Backend abstraction, blit operations, CPU and wgpu backends
//! - [`light`] - Emitters and the light registry
//! - [`render`] - Frame orchestration, targets, emission, trace, compose
//! - [`training`] - Convergence-driven training sessions and EXR export
//! - [`session`] - Simulation context (registry, trainer slot, host)
//! - [`host`] - Host application hooks
//!
//! ## Example
//!
//! ```ignore
//! use rt2d::prelude::*;
//!
//! let mut backend = CpuBackend::new();
//! let output = backend.create_texture(&TextureDesc::new("out", 256, 256, TextureFormat::Rgba32Float))?;
//! let mut renderer = Renderer::new(backend, RendererConfig::default());
//!
//! let mut session = SimulationSession::new();
//! let light: Arc<dyn Emitter> = Arc::new(PointLight::default());
//! session.register_light(&light);
//!
//! let camera = Camera2D::new(256, 256);
//! renderer.render(&mut session, &Frame { camera: &camera, scene: &EmptyScene, output })?;
//! ```

pub mod util;
pub mod config;
pub mod gpu;
pub mod light;
pub mod render;
pub mod training;
pub mod session;
pub mod host;

// Re-export commonly used types
pub use util::{Error, FloatImage, Result};
pub use config::RendererConfig;
pub use render::{Camera2D, Frame, FrameOutcome, Renderer};
pub use session::SimulationSession;

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("RT2D_BUILD_DATE");
/// Build time stamped by build.rs
pub const BUILD_TIME: &str = env!("RT2D_BUILD_TIME");

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::config::{Exposure, MipFilter, RendererConfig};
    pub use crate::gpu::cpu::CpuBackend;
    pub use crate::gpu::{GpuBackend, TextureDesc, TextureFormat, TextureId};
    pub use crate::host::{HostEvent, HostIntegration, NoopHost};
    pub use crate::light::{EmittedRay, Emitter, LightRegistry, PointLight, PointLightParams};
    pub use crate::render::{Camera2D, EmptyScene, Frame, FrameOutcome, Renderer, Scene, Sprite, SpriteScene};
    pub use crate::session::SimulationSession;
    pub use crate::training::{
        ExrExporter, SessionTrainer, Trainer, TrainingFrame, TrainingSample, TrainingSettings,
    };
    pub use crate::util::{Error, FloatImage, Result};
}

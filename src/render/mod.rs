//! Frame orchestration.
//!
//! A frame runs these stages in order:
//!
//! 1. **targets**: size the G-buffer and accumulation surfaces
//! 2. **scene**: clear and draw the G-buffer (skipped on training passes
//!    after the first, which keep the scene and only clear accumulation)
//! 3. **emission**: prune the light registry, emit rays into the ray buffer
//! 4. **trace**: dispatch `Kernel_Trace` + `Kernel_ConvertOutscatter`
//! 5. **integrate**: build the accumulation mip chain (live mode)
//! 6. **compose**: point-cloud integration, training running mean or
//!    diagnostic view into the output texture
//!
//! In training mode the training target is then read back and handed to the
//! [`TrainingController`](crate::training::TrainingController).

pub mod camera;
pub mod compose;
pub mod emission;
pub mod scene;
pub mod targets;
pub mod trace;

pub use camera::Camera2D;
pub use compose::ComposeMode;
pub use emission::{PhotonBudget, RayBuffer};
pub use scene::{EmptyScene, Scene, Sprite, SpriteScene};
pub use targets::RenderTargets;

use crate::config::{MipFilter, RendererConfig};
use crate::gpu::{GpuBackend, KernelSet, TextureId};
use crate::session::SimulationSession;
use crate::training::{PassOutcome, TrainingSettings};
use crate::util::Result;

/// Per-frame inputs.
pub struct Frame<'a, B: GpuBackend + ?Sized> {
    pub camera: &'a Camera2D,
    pub scene: &'a dyn Scene<B>,
    /// Receives the composed image
    pub output: TextureId,
}

/// What a call to [`Renderer::render`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Host was busy; nothing ran
    Skipped,
    /// Composed the previous accumulation without tracing
    Paused,
    /// Live frame with this many rays traced
    Live { rays: usize },
    /// Training pass finished
    Training { pass: u32, outcome: PassOutcome },
}

/// Owns the GPU-side state of the light-transport pipeline.
pub struct Renderer<B: GpuBackend> {
    backend: B,
    config: RendererConfig,
    targets: RenderTargets,
    rays: RayBuffer,
    kernels: Option<KernelSet>,
    training: TrainingSettings,
    frame_index: u64,
    disposed: bool,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, config: RendererConfig) -> Self {
        let config = config.validated();
        Self {
            backend,
            rays: RayBuffer::new(config.ray_capacity),
            training: TrainingSettings::from_defaults(&config.training),
            config,
            targets: RenderTargets::new(),
            kernels: None,
            frame_index: 0,
            disposed: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Mutable config. Ray capacity changes apply after [`Self::dispose`].
    pub fn config_mut(&mut self) -> &mut RendererConfig {
        &mut self.config
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn training_settings(&self) -> &TrainingSettings {
        &self.training
    }

    pub fn training_settings_mut(&mut self) -> &mut TrainingSettings {
        &mut self.training
    }

    /// Training target of the current session, if allocated.
    pub fn training_target(&self) -> Option<TextureId> {
        self.targets.training_target
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Kernels resolved so far (`None` before the first traced frame).
    pub fn kernels(&self) -> Option<KernelSet> {
        self.kernels
    }

    /// Forget resolved kernels; the next frame resolves them again.
    pub fn reload_kernels(&mut self) {
        self.kernels = None;
    }

    fn resolve_kernels(&mut self) -> KernelSet {
        if let Some(kernels) = self.kernels {
            return kernels;
        }
        let kernels = self.backend.resolve_kernels();
        if !kernels.trace {
            tracing::warn!("{} not found, tracing disabled", crate::gpu::KERNEL_TRACE);
        }
        if !kernels.convert {
            tracing::warn!("{} not found, conversion disabled", crate::gpu::KERNEL_CONVERT_OUTSCATTER);
        }
        self.kernels = Some(kernels);
        kernels
    }

    /// Render one frame into `frame.output`.
    pub fn render(&mut self, session: &mut SimulationSession, frame: &Frame<'_, B>) -> Result<FrameOutcome> {
        let span = tracing::info_span!("frame", index = self.frame_index);
        let _guard = span.enter();
        self.disposed = false;

        let (registry, controller, host) = session.parts_mut();
        if host.is_busy() {
            return Ok(FrameOutcome::Skipped);
        }
        self.frame_index += 1;

        let training = controller.is_active();
        let paused = self.config.diagnostics.pause_tracing || host.is_paused();

        if training {
            if !paused && self.training.pass_count == 1 {
                controller.begin_pass(&mut self.training, registry)?;
            }
        } else {
            // live frames restore the configured training defaults
            self.training = TrainingSettings::from_defaults(&self.config.training);
        }
        let pass = self.training.pass_count;

        host.prepare_frame(frame.camera);
        let (width, height) = if training {
            (self.training.training_width, self.training.training_height)
        } else {
            frame.camera.pixel_size()
        };
        self.targets.ensure_targets(&mut self.backend, width, height, training)?;
        let kernels = self.resolve_kernels();

        if !paused {
            if !training || pass < 2 {
                self.targets.clear_and_bind(&mut self.backend, frame.camera.background)?;
                frame.scene.draw_gbuffer(&mut self.backend, &self.targets, frame.camera)?;
            } else {
                self.targets.clear_accumulation(&mut self.backend)?;
            }
        }

        if paused {
            let mode = self.compose_mode(training, pass, false);
            compose::compose_and_present(&mut self.backend, &self.targets, frame.output, &mode)?;
            return Ok(FrameOutcome::Paused);
        }

        let budget = if training {
            PhotonBudget { training: true, pass_count: pass, detail: self.training.detail }
        } else {
            PhotonBudget::live()
        };
        let lights = registry.collect_and_prune();
        let ray_count = emission::emit_all(&lights, &budget, &mut self.rays, &mut self.backend)?;
        trace::trace(&mut self.backend, &self.targets, frame.camera, &self.rays, ray_count, kernels)?;

        if !training {
            match self.config.integration.mip_filter {
                MipFilter::Gaussian => trace::integrate(&mut self.backend, &self.targets)?,
                MipFilter::Bilinear10x10 => trace::integrate_bilinear(&mut self.backend, &self.targets)?,
            }
            if self.config.integration.variance_mips {
                let mip_max = self.config.diagnostics.variance_mip_max.round() as u32;
                let source = self.config.integration.variance_source;
                trace::integrate_variance(&mut self.backend, &self.targets, source, mip_max)?;
            }
        }

        let mode = self.compose_mode(training, pass, true);
        compose::compose_and_present(&mut self.backend, &self.targets, frame.output, &mode)?;

        if training {
            let image = self.backend.read_texture(self.targets.training()?, 0)?;
            let outcome = controller.end_pass(&mut self.training, image)?;
            tracing::debug!(pass, ?outcome, delta = self.training.frame_delta(), "training pass");
            Ok(FrameOutcome::Training { pass, outcome })
        } else {
            host.draw_unsupported(frame.camera);
            Ok(FrameOutcome::Live { rays: ray_count })
        }
    }

    fn compose_mode(&self, training: bool, pass: u32, accumulate: bool) -> ComposeMode {
        let diagnostics = &self.config.diagnostics;
        if diagnostics.enable {
            ComposeMode::Diagnostic {
                mip: diagnostics.select_mip,
                variance_max: diagnostics.variance_mip_max,
                show_variance: self.config.integration.variance_mips,
            }
        } else if training {
            ComposeMode::Training { pass, detail: self.training.detail, accumulate }
        } else {
            ComposeMode::Live { min_photons: self.config.integration.min_photons, exposure: self.config.exposure }
        }
    }

    /// Release all targets and the ray buffer. Safe to call repeatedly;
    /// the next frame reallocates.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.targets.release_all(&mut self.backend);
        self.rays.release(&mut self.backend);
        self.rays = RayBuffer::new(self.config.ray_capacity);
        self.disposed = true;
        tracing::debug!("renderer disposed");
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::cpu::CpuBackend;
    use crate::gpu::{TextureDesc, TextureFormat};
    use crate::host::HostIntegration;
    use crate::light::{Emitter, PointLight, PointLightParams};
    use std::sync::Arc;

    fn renderer() -> (Renderer<CpuBackend>, TextureId) {
        let mut backend = CpuBackend::new();
        let output = backend.create_texture(&TextureDesc::new("out", 32, 32, TextureFormat::Rgba32Float)).unwrap();
        let config = RendererConfig { ray_capacity: 1 << 14, ..Default::default() };
        (Renderer::new(backend, config), output)
    }

    fn light(segments: u32) -> Arc<dyn Emitter> {
        Arc::new(PointLight::new(PointLightParams { segments, radius: 0.5, ..Default::default() }).with_seed(9))
    }

    #[test]
    fn test_live_frame_traces_lights() {
        let (mut r, output) = renderer();
        let mut session = SimulationSession::new();
        session.register_light(&light(2000));
        let camera = Camera2D::new(32, 32);
        let frame = Frame { camera: &camera, scene: &EmptyScene, output };
        let outcome = r.render(&mut session, &frame).unwrap();
        assert_eq!(outcome, FrameOutcome::Live { rays: 2000 });
        assert_eq!(r.backend().counters().trace_dispatches, 1);
        let px = r.backend_mut().read_texture(output, 0).unwrap().get(16, 16);
        assert!(px[0] > 0.0, "{px:?}");
    }

    struct Busy;

    impl HostIntegration for Busy {
        fn is_busy(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_busy_host_skips_frame() {
        let (mut r, output) = renderer();
        let mut session = SimulationSession::with_host(Box::new(Busy));
        let camera = Camera2D::new(32, 32);
        let frame = Frame { camera: &camera, scene: &EmptyScene, output };
        assert_eq!(r.render(&mut session, &frame).unwrap(), FrameOutcome::Skipped);
        assert!(!r.targets().is_allocated());
        assert_eq!(r.frame_index(), 0);
    }

    #[test]
    fn test_paused_frame_composes_without_trace() {
        let (mut r, output) = renderer();
        r.config_mut().diagnostics.pause_tracing = true;
        let mut session = SimulationSession::new();
        session.register_light(&light(100));
        let camera = Camera2D::new(32, 32);
        let frame = Frame { camera: &camera, scene: &EmptyScene, output };
        assert_eq!(r.render(&mut session, &frame).unwrap(), FrameOutcome::Paused);
        assert_eq!(r.backend().counters().trace_dispatches, 0);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut r, output) = renderer();
        let mut session = SimulationSession::new();
        session.register_light(&light(100));
        let camera = Camera2D::new(32, 32);
        r.render(&mut session, &Frame { camera: &camera, scene: &EmptyScene, output }).unwrap();
        r.dispose();
        r.dispose();
        assert!(!r.targets().is_allocated());
        // only the caller's output texture remains
        assert_eq!(r.backend().stats().live_textures(), 1);
        assert_eq!(r.backend().stats().live_buffers(), 0);
    }
}

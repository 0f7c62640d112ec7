//! Training sessions end to end: pass cycling, convergence and EXR export.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use rt2d::config::{RendererConfig, TrainingDefaults};
use rt2d::gpu::cpu::CpuBackend;
use rt2d::gpu::{GpuBackend, TextureDesc, TextureFormat, TextureId};
use rt2d::host::HostIntegration;
use rt2d::light::{LightRegistry, PointLight, PointLightParams};
use rt2d::render::{Camera2D, EmptyScene, Frame, FrameOutcome, Renderer};
use rt2d::training::session::SessionConfig;
use rt2d::training::{
    ConvergenceMetric, PassOutcome, SampleScene, SampleSetup, SessionTrainer, Trainer, TrainingFrame,
    TrainingSample,
};
use rt2d::{FloatImage, Result, SimulationSession};

/// Converges at pass 4: smoothed 1/pass with bias 1 drops below 0.3 there.
fn fast_renderer() -> (Renderer<CpuBackend>, TextureId) {
    let mut backend = CpuBackend::new();
    let output = backend
        .create_texture(&TextureDesc::new("Output", 16, 16, TextureFormat::Rgba32Float))
        .unwrap();
    let config = RendererConfig {
        ray_capacity: 1 << 16,
        training: TrainingDefaults {
            detail: 2.0,
            frame_delta_bias: 1.0,
            convergence_threshold: 0.3,
            width: 16,
            height: 16,
            metric: ConvergenceMetric::PassReciprocal,
        },
        ..Default::default()
    };
    (Renderer::new(backend, config), output)
}

#[test]
fn test_session_exports_in_out_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let (mut renderer, output) = fast_renderer();
    let mut session = SimulationSession::new();
    let config = SessionConfig {
        samples: 2,
        session_name: "Unit".into(),
        convergence_threshold: 0.3,
        output_size: 16,
        seed: Some(42),
    };
    session.set_trainer(Box::new(SessionTrainer::new(config, dir.path())));

    let camera = Camera2D::new(16, 16);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    let mut outcomes = Vec::new();
    while session.is_training() && outcomes.len() < 20 {
        outcomes.push(renderer.render(&mut session, &frame).unwrap());
    }

    assert_eq!(outcomes.len(), 8);
    assert_eq!(
        outcomes[3],
        FrameOutcome::Training { pass: 4, outcome: PassOutcome::SampleConverged { index: 0 } }
    );
    assert_eq!(outcomes[7], FrameOutcome::Training { pass: 4, outcome: PassOutcome::Exhausted });

    let session_dir = dir.path().join("Unit");
    for name in ["Test_0000_In.exr", "Test_0000_Out.exr", "Test_0001_In.exr", "Test_0001_Out.exr"] {
        let path = session_dir.join(name);
        assert!(path.exists(), "missing {}", path.display());
    }
    let converged = FloatImage::load(&session_dir.join("Test_0000_Out.exr")).unwrap();
    assert_eq!((converged.width, converged.height), (16, 16));

    // back to live with the configured defaults
    let outcome = renderer.render(&mut session, &frame).unwrap();
    assert!(matches!(outcome, FrameOutcome::Live { .. }), "{outcome:?}");
    assert_eq!(renderer.training_settings().pass_count, 1);
    assert_eq!(renderer.training_settings().convergence_threshold(), 0.3);
}

/// Fixed light at the origin.
struct CenterLight;

impl TrainingSample for CenterLight {
    fn name(&self) -> &str {
        "Center"
    }

    fn setup(&self, registry: &LightRegistry) -> Result<SampleScene> {
        let mut scene = SampleScene::new();
        let params = PointLightParams { radius: 0.5, segments: 4000, ..Default::default() };
        scene.add_light(registry, PointLight::new(params).with_seed(7));
        Ok(scene)
    }
}

#[derive(Default)]
struct Captured {
    sizes: Vec<(u32, u32)>,
    input_energy: f64,
    output_energy: f64,
    output_pass: u32,
}

struct Capture {
    size: u32,
    log: Arc<Mutex<Captured>>,
}

impl Trainer for Capture {
    fn samples(&self) -> Vec<Arc<dyn TrainingSample>> {
        vec![Arc::new(CenterLight)]
    }

    fn on_sample_starting(&mut self, setup: &mut SampleSetup<'_>) -> Result<()> {
        setup.settings.training_width = self.size;
        setup.settings.training_height = self.size;
        Ok(())
    }

    fn on_input_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()> {
        let mut log = self.log.lock();
        log.sizes.push((frame.image.width, frame.image.height));
        log.input_energy = frame.image.channel_sums()[0];
        Ok(())
    }

    fn on_output_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()> {
        let mut log = self.log.lock();
        log.sizes.push((frame.image.width, frame.image.height));
        log.output_energy = frame.image.channel_sums()[0];
        log.output_pass = frame.pass_count;
        Ok(())
    }
}

#[test]
fn test_training_target_is_power_of_two_and_energy_normalized() {
    let (mut renderer, output) = fast_renderer();
    let log = Arc::new(Mutex::new(Captured::default()));
    let mut session = SimulationSession::new();
    session.set_trainer(Box::new(Capture { size: 24, log: log.clone() }));

    let camera = Camera2D::new(16, 16);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    for _ in 0..10 {
        if !session.is_training() {
            break;
        }
        renderer.render(&mut session, &frame).unwrap();
    }
    assert!(!session.is_training());

    let log = log.lock();
    assert_eq!(log.sizes, [(32, 32), (32, 32)]);
    assert_eq!(log.output_pass, 4);
    // later passes carry `detail` times the photons but are scaled back
    let ratio = log.output_energy / log.input_energy;
    println!("input {} output {} ratio {ratio}", log.input_energy, log.output_energy);
    assert!((ratio - 1.0).abs() < 0.1, "ratio {ratio}");
}

struct Pausable(Arc<AtomicBool>);

impl HostIntegration for Pausable {
    fn is_paused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[test]
fn test_paused_host_holds_training_pass() {
    let (mut renderer, output) = fast_renderer();
    let paused = Arc::new(AtomicBool::new(false));
    let mut session = SimulationSession::with_host(Box::new(Pausable(paused.clone())));
    let log = Arc::new(Mutex::new(Captured::default()));
    session.set_trainer(Box::new(Capture { size: 16, log: log.clone() }));

    let camera = Camera2D::new(16, 16);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    let first = renderer.render(&mut session, &frame).unwrap();
    assert_eq!(first, FrameOutcome::Training { pass: 1, outcome: PassOutcome::Continue });

    paused.store(true, Ordering::Relaxed);
    let traces = renderer.backend().counters().trace_dispatches;
    for _ in 0..3 {
        assert_eq!(renderer.render(&mut session, &frame).unwrap(), FrameOutcome::Paused);
    }
    assert_eq!(renderer.backend().counters().trace_dispatches, traces);
    assert_eq!(renderer.training_settings().pass_count, 2);

    paused.store(false, Ordering::Relaxed);
    let resumed = renderer.render(&mut session, &frame).unwrap();
    assert_eq!(resumed, FrameOutcome::Training { pass: 2, outcome: PassOutcome::Continue });
    assert_eq!(log.lock().sizes.len(), 1);
}

#[test]
fn test_trainer_without_samples_stays_live() {
    let dir = tempfile::tempdir().unwrap();
    let (mut renderer, output) = fast_renderer();
    let mut session = SimulationSession::new();
    let config = SessionConfig { samples: 0, ..Default::default() };
    session.set_trainer(Box::new(SessionTrainer::new(config, dir.path())));
    assert!(!session.is_training());

    let camera = Camera2D::new(16, 16);
    let outcome = renderer.render(&mut session, &Frame { camera: &camera, scene: &EmptyScene, output }).unwrap();
    assert_eq!(outcome, FrameOutcome::Live { rays: 0 });
}

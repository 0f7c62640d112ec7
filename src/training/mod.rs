//! Training mode: multi-pass rendering driven to convergence.
//!
//! A [`Trainer`] supplies a list of [`TrainingSample`]s. For each sample the
//! renderer:
//!
//! 1. calls [`Trainer::on_sample_starting`] (pass 1), letting the trainer
//!    populate the scene and adjust [`TrainingSettings`]
//! 2. renders pass 1 and hands the noisy result to
//!    [`Trainer::on_input_rendered`]
//! 3. renders further passes with `detail` times the photons, folding each
//!    into a running mean, until the smoothed frame delta drops below the
//!    threshold
//! 4. hands the converged result to [`Trainer::on_output_rendered`] and
//!    moves to the next sample
//!
//! When the samples run out the trainer slot is cleared and rendering
//! returns to live mode.

pub mod export;
mod metric;
pub mod session;

use std::sync::Arc;

use crate::config::TrainingDefaults;
use crate::light::{Emitter, LightRegistry, PointLight};
use crate::util::{FloatImage, Result};

pub use export::ExrExporter;
pub use metric::{ConvergenceMetric, ConvergenceTracker};
pub use session::{RandomLightSample, SessionTrainer};

/// Training parameters the renderer exposes to trainers.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSettings {
    /// Pass of the current sample, starting at 1
    pub pass_count: u32,
    pub training_width: u32,
    pub training_height: u32,
    /// Photon multiplier on passes after the first
    pub detail: f64,
    pub tracker: ConvergenceTracker,
    pub metric: ConvergenceMetric,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self::from_defaults(&TrainingDefaults::default())
    }
}

impl TrainingSettings {
    pub fn from_defaults(defaults: &TrainingDefaults) -> Self {
        Self {
            pass_count: 1,
            training_width: defaults.width.max(1),
            training_height: defaults.height.max(1),
            detail: defaults.detail,
            tracker: ConvergenceTracker::new(defaults.frame_delta_bias, defaults.convergence_threshold),
            metric: defaults.metric,
        }
    }

    pub fn convergence_threshold(&self) -> f64 {
        self.tracker.threshold
    }

    pub fn set_convergence_threshold(&mut self, threshold: f64) {
        self.tracker.threshold = threshold;
    }

    pub fn frame_delta(&self) -> f64 {
        self.tracker.frame_delta
    }

    /// Back to pass 1 with an unconverged delta.
    pub fn reset_progress(&mut self) {
        self.pass_count = 1;
        self.tracker.reset();
    }
}

/// Where the controller is in the sample cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainingPhase {
    #[default]
    Idle,
    SampleSetup,
    Accumulating,
    Converged,
}

/// Lights created for one sample. Dropping the scene destroys them, which
/// makes the registry evict them at the next emission pass.
#[derive(Debug, Default)]
pub struct SampleScene {
    lights: Vec<Arc<PointLight>>,
}

impl SampleScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a light and register it for the next frame.
    pub fn add_light(&mut self, registry: &LightRegistry, light: PointLight) -> Arc<PointLight> {
        let light = Arc::new(light);
        let emitter: Arc<dyn Emitter> = light.clone();
        registry.register(&emitter);
        self.lights.push(Arc::clone(&light));
        light
    }

    pub fn lights(&self) -> &[Arc<PointLight>] {
        &self.lights
    }
}

impl Drop for SampleScene {
    fn drop(&mut self) {
        for light in &self.lights {
            light.destroy();
        }
    }
}

/// One training sample: a scene configuration rendered to convergence.
pub trait TrainingSample: Send + Sync {
    fn name(&self) -> &str;

    /// Build the sample's scene.
    fn setup(&self, registry: &LightRegistry) -> Result<SampleScene>;
}

/// Context handed to [`Trainer::on_sample_starting`].
pub struct SampleSetup<'a> {
    pub settings: &'a mut TrainingSettings,
    pub registry: &'a LightRegistry,
    pub sample: &'a dyn TrainingSample,
    pub index: usize,
}

/// A rendered training frame.
pub struct TrainingFrame<'a> {
    pub sample: &'a dyn TrainingSample,
    pub index: usize,
    pub pass_count: u32,
    /// Contents of the training target
    pub image: &'a FloatImage,
}

/// Drives a training session.
pub trait Trainer: Send {
    fn samples(&self) -> Vec<Arc<dyn TrainingSample>>;

    fn on_sample_starting(&mut self, setup: &mut SampleSetup<'_>) -> Result<()>;

    /// Pass 1 result (single-pass noisy render).
    fn on_input_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()>;

    /// Converged result.
    fn on_output_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()>;
}

/// What a finished pass led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Continue,
    SampleConverged { index: usize },
    /// Last sample converged; the trainer slot is now empty
    Exhausted,
}

/// Active-trainer slot plus sample bookkeeping.
#[derive(Default)]
pub struct TrainingController {
    trainer: Option<Box<dyn Trainer>>,
    samples: Vec<Arc<dyn TrainingSample>>,
    index: usize,
    phase: TrainingPhase,
    previous: Option<FloatImage>,
    completed: usize,
}

impl std::fmt::Debug for TrainingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingController")
            .field("active", &self.trainer.is_some())
            .field("samples", &self.samples.len())
            .field("index", &self.index)
            .field("phase", &self.phase)
            .finish()
    }
}

impl TrainingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a trainer; a trainer without samples is ignored.
    pub fn start(&mut self, trainer: Box<dyn Trainer>) {
        let samples = trainer.samples();
        if samples.is_empty() {
            tracing::warn!("trainer has no samples, staying in live mode");
            self.clear();
            return;
        }
        tracing::info!(samples = samples.len(), "training started");
        self.trainer = Some(trainer);
        self.samples = samples;
        self.index = 0;
        self.completed = 0;
        self.phase = TrainingPhase::SampleSetup;
        self.previous = None;
    }

    /// Empty the trainer slot.
    pub fn clear(&mut self) {
        if self.trainer.take().is_some() {
            tracing::info!(completed = self.completed, "training stopped");
        }
        self.samples.clear();
        self.index = 0;
        self.phase = TrainingPhase::Idle;
        self.previous = None;
    }

    pub fn is_active(&self) -> bool {
        self.trainer.is_some()
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn sample_index(&self) -> usize {
        self.index
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Samples that reached convergence since `start`.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn current_sample(&self) -> Option<&Arc<dyn TrainingSample>> {
        self.samples.get(self.index)
    }

    /// Run sample setup when a new sample begins (pass 1).
    pub fn begin_pass(&mut self, settings: &mut TrainingSettings, registry: &LightRegistry) -> Result<()> {
        let Some(trainer) = self.trainer.as_mut() else {
            return Ok(());
        };
        if settings.pass_count != 1 {
            return Ok(());
        }
        let Some(sample) = self.samples.get(self.index).cloned() else {
            return Ok(());
        };
        self.phase = TrainingPhase::SampleSetup;
        self.previous = None;
        tracing::debug!(index = self.index, name = sample.name(), "sample starting");
        trainer.on_sample_starting(&mut SampleSetup {
            settings,
            registry,
            sample: sample.as_ref(),
            index: self.index,
        })
    }

    /// Account for a rendered pass whose training target read back as `image`.
    pub fn end_pass(&mut self, settings: &mut TrainingSettings, image: FloatImage) -> Result<PassOutcome> {
        let Some(trainer) = self.trainer.as_mut() else {
            return Ok(PassOutcome::Continue);
        };
        let Some(sample) = self.samples.get(self.index).cloned() else {
            return Ok(PassOutcome::Continue);
        };
        let pass = settings.pass_count;
        let frame = TrainingFrame { sample: sample.as_ref(), index: self.index, pass_count: pass, image: &image };

        if pass == 1 {
            trainer.on_input_rendered(&frame)?;
        } else {
            let measured = settings.metric.measure(self.previous.as_ref(), &image, pass);
            settings.tracker.update(measured);
            tracing::trace!(pass, measured, delta = settings.frame_delta(), "pass measured");
        }

        if settings.tracker.is_converged() {
            self.phase = TrainingPhase::Converged;
            tracing::info!(index = self.index, passes = pass, "sample converged");
            trainer.on_output_rendered(&frame)?;
            settings.reset_progress();
            self.completed += 1;
            self.index += 1;
            self.previous = None;
            if self.index >= self.samples.len() {
                self.clear();
                return Ok(PassOutcome::Exhausted);
            }
            return Ok(PassOutcome::SampleConverged { index: self.index - 1 });
        }

        self.phase = TrainingPhase::Accumulating;
        self.previous = Some(image);
        settings.pass_count += 1;
        Ok(PassOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Named(String);

    impl TrainingSample for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn setup(&self, _registry: &LightRegistry) -> Result<SampleScene> {
            Ok(SampleScene::new())
        }
    }

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
    }

    struct Recorder {
        samples: usize,
        log: Arc<Mutex<Log>>,
    }

    impl Trainer for Recorder {
        fn samples(&self) -> Vec<Arc<dyn TrainingSample>> {
            (0..self.samples)
                .map(|i| Arc::new(Named(format!("s{i}"))) as Arc<dyn TrainingSample>)
                .collect()
        }

        fn on_sample_starting(&mut self, setup: &mut SampleSetup<'_>) -> Result<()> {
            setup.settings.set_convergence_threshold(0.5);
            self.log.lock().events.push(format!("start {}", setup.index));
            Ok(())
        }

        fn on_input_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()> {
            self.log.lock().events.push(format!("in {}", frame.index));
            Ok(())
        }

        fn on_output_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()> {
            self.log.lock().events.push(format!("out {} {}", frame.index, frame.pass_count));
            Ok(())
        }
    }

    #[test]
    fn test_cycle_until_exhausted() {
        let log = Arc::new(Mutex::new(Log::default()));
        let registry = LightRegistry::new();
        let mut settings = TrainingSettings::default();
        settings.metric = ConvergenceMetric::PassReciprocal;
        settings.tracker.bias = 1.0;

        let mut controller = TrainingController::new();
        controller.start(Box::new(Recorder { samples: 2, log: log.clone() }));

        let mut outcomes = Vec::new();
        for _ in 0..20 {
            if !controller.is_active() {
                break;
            }
            controller.begin_pass(&mut settings, &registry).unwrap();
            outcomes.push(controller.end_pass(&mut settings, FloatImage::new(1, 1)).unwrap());
        }

        // 1/pass < 0.5 first at pass 3
        assert_eq!(
            log.lock().events,
            ["start 0", "in 0", "out 0 3", "start 1", "in 1", "out 1 3"]
        );
        assert_eq!(outcomes.last(), Some(&PassOutcome::Exhausted));
        assert_eq!(controller.phase(), TrainingPhase::Idle);
        assert_eq!(settings.pass_count, 1);
        assert_eq!(settings.frame_delta(), 1.0);
    }

    #[test]
    fn test_empty_trainer_ignored() {
        let mut controller = TrainingController::new();
        controller.start(Box::new(Recorder { samples: 0, log: Default::default() }));
        assert!(!controller.is_active());
    }

    #[test]
    fn test_sample_scene_destroys_lights_on_drop() {
        let registry = LightRegistry::new();
        let mut scene = SampleScene::new();
        let light = scene.add_light(&registry, PointLight::default());
        assert_eq!(registry.len(), 1);
        drop(scene);
        assert!(light.is_stale());
        assert!(registry.collect_and_prune().is_empty());
        assert!(registry.is_empty());
    }
}

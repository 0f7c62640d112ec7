//! Ready-made trainer: random single-light samples exported as EXR pairs.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::export::{ExportKind, ExrExporter};
use super::{SampleScene, SampleSetup, Trainer, TrainingFrame, TrainingSample};
use crate::light::{LightRegistry, PointLight, PointLightParams};
use crate::util::{Result, Vec2, Vec3};

/// Colors random samples pick from.
pub const LIGHT_COLORS: [[f32; 3]; 7] = [
    [1.0, 1.0, 1.0],
    [0.95, 0.1, 0.1],
    [0.1, 0.95, 0.1],
    [0.1, 0.1, 0.95],
    [0.95, 0.95, 0.1],
    [0.95, 0.1, 0.95],
    [0.1, 0.95, 0.95],
];

/// Sample with one randomly placed point light.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomLightSample {
    pub name: String,
    pub position: Vec2,
    pub radius: f32,
    pub color: Vec3,
    pub brightness: f32,
}

impl RandomLightSample {
    pub const POSITION_MIN: Vec2 = Vec2::new(-1.0, -1.0);
    pub const POSITION_MAX: Vec2 = Vec2::new(1.0, 1.0);
    pub const RADIUS_MIN: f32 = 0.1;
    pub const RADIUS_MAX: f32 = 5.0;
    pub const BRIGHTNESS_MIN: f32 = 0.1;
    pub const BRIGHTNESS_MAX: f32 = 1000.0;

    pub fn random(name: impl Into<String>, rng: &mut impl Rng) -> Self {
        let position = Vec2::new(
            rng.gen_range(Self::POSITION_MIN.x..=Self::POSITION_MAX.x),
            rng.gen_range(Self::POSITION_MIN.y..=Self::POSITION_MAX.y),
        );
        let color = LIGHT_COLORS[rng.gen_range(0..LIGHT_COLORS.len())];
        // log-uniform so every decade of brightness is equally likely
        let (lo, hi) = (Self::BRIGHTNESS_MIN.ln(), Self::BRIGHTNESS_MAX.ln());
        Self {
            name: name.into(),
            position,
            radius: rng.gen_range(Self::RADIUS_MIN..=Self::RADIUS_MAX),
            color: Vec3::from_array(color),
            brightness: rng.gen_range(lo..=hi).exp().clamp(Self::BRIGHTNESS_MIN, Self::BRIGHTNESS_MAX),
        }
    }

    pub fn light_params(&self) -> PointLightParams {
        PointLightParams {
            position: self.position,
            radius: self.radius,
            color: self.color,
            intensity: self.brightness,
            ..Default::default()
        }
    }
}

impl TrainingSample for RandomLightSample {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&self, registry: &LightRegistry) -> Result<SampleScene> {
        let mut scene = SampleScene::new();
        scene.add_light(registry, PointLight::new(self.light_params()));
        Ok(scene)
    }
}

/// Trainer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub samples: usize,
    pub session_name: String,
    pub convergence_threshold: f64,
    /// Square output resolution
    pub output_size: u32,
    /// RNG seed for sample generation; clock-seeded when `None`
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            session_name: "BasicTraining".into(),
            convergence_threshold: 0.001,
            output_size: 1024,
            seed: None,
        }
    }
}

/// Renders random light samples and exports `In`/`Out` EXR pairs.
pub struct SessionTrainer {
    config: SessionConfig,
    samples: Vec<Arc<dyn TrainingSample>>,
    exporter: ExrExporter,
    scene: Option<SampleScene>,
    exported: Vec<std::path::PathBuf>,
}

impl SessionTrainer {
    pub fn new(config: SessionConfig, exporter_root: impl Into<std::path::PathBuf>) -> Self {
        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let samples = (0..config.samples)
            .map(|_| Arc::new(RandomLightSample::random("Test", &mut rng)) as Arc<dyn TrainingSample>)
            .collect();
        let exporter = ExrExporter::new(exporter_root, config.session_name.clone());
        Self { config, samples, exporter, scene: None, exported: Vec::new() }
    }

    /// Trainer over explicit samples.
    pub fn with_samples(
        config: SessionConfig,
        samples: Vec<Arc<dyn TrainingSample>>,
        exporter_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        let exporter = ExrExporter::new(exporter_root, config.session_name.clone());
        Self { config, samples, exporter, scene: None, exported: Vec::new() }
    }

    pub fn exporter(&self) -> &ExrExporter {
        &self.exporter
    }

    /// Files written so far.
    pub fn exported(&self) -> &[std::path::PathBuf] {
        &self.exported
    }
}

impl Trainer for SessionTrainer {
    fn samples(&self) -> Vec<Arc<dyn TrainingSample>> {
        self.samples.clone()
    }

    fn on_sample_starting(&mut self, setup: &mut SampleSetup<'_>) -> Result<()> {
        setup.settings.set_convergence_threshold(self.config.convergence_threshold);
        setup.settings.training_width = self.config.output_size;
        setup.settings.training_height = self.config.output_size;
        // previous sample's lights go stale here
        self.scene = None;
        self.scene = Some(setup.sample.setup(setup.registry)?);
        Ok(())
    }

    fn on_input_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()> {
        let path = self.exporter.export(frame.image, frame.sample.name(), frame.index, ExportKind::Input)?;
        self.exported.push(path);
        Ok(())
    }

    fn on_output_rendered(&mut self, frame: &TrainingFrame<'_>) -> Result<()> {
        let path = self.exporter.export(frame.image, frame.sample.name(), frame.index, ExportKind::Output)?;
        self.exported.push(path);
        self.scene = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sample_ranges() {
        let mut rng = SmallRng::seed_from_u64(11);
        for i in 0..500 {
            let s = RandomLightSample::random(format!("s{i}"), &mut rng);
            assert!(s.position.abs().max_element() <= 1.0);
            assert!((0.1..=5.0).contains(&s.radius));
            assert!((0.1..=1000.0).contains(&s.brightness));
            assert!(LIGHT_COLORS.contains(&s.color.to_array()));
        }
    }

    #[test]
    fn test_setup_registers_light() {
        let registry = LightRegistry::new();
        let mut rng = SmallRng::seed_from_u64(5);
        let sample = RandomLightSample::random("Test", &mut rng);
        let scene = sample.setup(&registry).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(scene.lights()[0].params().intensity, sample.brightness);
    }

    #[test]
    fn test_defaults() {
        let c = SessionConfig::default();
        assert_eq!((c.samples, c.output_size), (1000, 1024));
        assert_eq!(c.session_name, "BasicTraining");
        let trainer = SessionTrainer::new(SessionConfig { samples: 3, seed: Some(1), ..c }, "/tmp");
        assert_eq!(trainer.samples().len(), 3);
    }
}

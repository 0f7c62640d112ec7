//! Explicit simulation context shared by scene code and the renderer.

use std::sync::Arc;

use crate::host::{HostEvent, HostIntegration, NoopHost};
use crate::light::{Emitter, LightRegistry};
use crate::training::{Trainer, TrainingController};

/// Light registry, active-trainer slot and host hooks for one simulation.
pub struct SimulationSession {
    registry: LightRegistry,
    training: TrainingController,
    host: Box<dyn HostIntegration>,
}

impl Default for SimulationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationSession")
            .field("registry", &self.registry)
            .field("training", &self.training)
            .finish_non_exhaustive()
    }
}

impl SimulationSession {
    pub fn new() -> Self {
        Self::with_host(Box::new(NoopHost))
    }

    pub fn with_host(host: Box<dyn HostIntegration>) -> Self {
        Self { registry: LightRegistry::new(), training: TrainingController::new(), host }
    }

    pub fn registry(&self) -> &LightRegistry {
        &self.registry
    }

    /// Shorthand for `registry().register(light)`.
    pub fn register_light(&self, light: &Arc<dyn Emitter>) -> bool {
        self.registry.register(light)
    }

    pub fn training(&self) -> &TrainingController {
        &self.training
    }

    pub fn training_mut(&mut self) -> &mut TrainingController {
        &mut self.training
    }

    pub fn host(&self) -> &dyn HostIntegration {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> &mut dyn HostIntegration {
        self.host.as_mut()
    }

    /// Install a trainer; the next frame starts its first sample.
    pub fn set_trainer(&mut self, trainer: Box<dyn Trainer>) {
        self.training.start(trainer);
    }

    pub fn clear_trainer(&mut self) {
        self.training.clear();
    }

    pub fn is_training(&self) -> bool {
        self.training.is_active()
    }

    /// Forward a host event; leaving play mode ends training.
    pub fn handle_event(&mut self, event: HostEvent) {
        if event == HostEvent::ExitingPlayMode {
            self.training.clear();
        }
        self.host.on_event(event);
    }

    /// Split borrow used by the renderer during a frame.
    pub(crate) fn parts_mut(&mut self) -> (&LightRegistry, &mut TrainingController, &mut dyn HostIntegration) {
        (&self.registry, &mut self.training, self.host.as_mut())
    }
}

//! Host (editor/application) integration hooks.

use crate::render::Camera2D;

/// Lifecycle notifications from the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    EnteredPlayMode,
    /// Leaving play mode ends any training session
    ExitingPlayMode,
    Paused,
    Resumed,
}

/// Hooks the renderer calls into the host. Every method has a no-op default.
pub trait HostIntegration: Send {
    /// Host is rebuilding (e.g. recompiling); skip the frame entirely.
    fn is_busy(&self) -> bool {
        false
    }

    /// Host is paused; frames compose but do not trace.
    fn is_paused(&self) -> bool {
        false
    }

    /// Called before targets are prepared.
    fn prepare_frame(&mut self, _camera: &Camera2D) {}

    /// Called on live frames after the G-buffer is drawn, so the host can
    /// draw objects the renderer does not support.
    fn draw_unsupported(&mut self, _camera: &Camera2D) {}

    fn on_event(&mut self, _event: HostEvent) {}
}

/// Host with no editor behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHost;

impl HostIntegration for NoopHost {}

//! Set of lights considered for the next frame.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Emitter;

/// Identity-keyed emitter set with deferred eviction of stale entries.
///
/// Registration is idempotent and may happen from any thread. Stale entries
/// are only removed by [`collect_and_prune`](Self::collect_and_prune), so an
/// emitter that goes stale mid-frame is still seen (and skipped) once.
#[derive(Default)]
pub struct LightRegistry {
    lights: Mutex<Vec<Arc<dyn Emitter>>>,
}

#[inline]
fn same(a: &Arc<dyn Emitter>, b: &Arc<dyn Emitter>) -> bool {
    // data pointer only; vtable pointers may differ across codegen units
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl LightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `light` unless already present. Returns true if inserted.
    pub fn register(&self, light: &Arc<dyn Emitter>) -> bool {
        let mut lights = self.lights.lock();
        if lights.iter().any(|l| same(l, light)) {
            return false;
        }
        lights.push(Arc::clone(light));
        true
    }

    pub fn contains(&self, light: &Arc<dyn Emitter>) -> bool {
        self.lights.lock().iter().any(|l| same(l, light))
    }

    /// Evict stale entries and return the lit ones, in insertion order.
    pub fn collect_and_prune(&self) -> Vec<Arc<dyn Emitter>> {
        let mut lights = self.lights.lock();
        let stale: Vec<usize> = lights
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_stale())
            .map(|(i, _)| i)
            .collect();
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "evicting stale lights");
            for i in stale.into_iter().rev() {
                lights.remove(i);
            }
        }
        lights.iter().filter(|l| l.is_lit()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lights.lock().clear();
    }
}

impl std::fmt::Debug for LightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightRegistry").field("len", &self.len()).finish()
    }
}

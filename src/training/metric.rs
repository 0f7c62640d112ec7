//! Convergence measurement for training passes.

use serde::{Deserialize, Serialize};

use crate::util::{luminance, FloatImage};

/// How a pass's change relative to the previous pass is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConvergenceMetric {
    /// RMS of per-pixel luminance change divided by the current RMS luminance
    #[default]
    RelativeRmsDelta,
    /// `1 / pass`, independent of image content
    PassReciprocal,
}

impl ConvergenceMetric {
    /// Measure pass `pass` (producing `current`) against the previous pass.
    pub fn measure(&self, previous: Option<&FloatImage>, current: &FloatImage, pass: u32) -> f64 {
        match self {
            Self::PassReciprocal => 1.0 / pass.max(1) as f64,
            Self::RelativeRmsDelta => match previous {
                Some(prev) if prev.width == current.width && prev.height == current.height => {
                    relative_rms_delta(prev, current)
                }
                _ => 1.0,
            },
        }
    }
}

fn relative_rms_delta(previous: &FloatImage, current: &FloatImage) -> f64 {
    let n = current.pixels.len();
    if n == 0 {
        return 0.0;
    }
    let diff_sq: f64 = previous
        .pixels
        .iter()
        .zip(&current.pixels)
        .map(|(a, b)| {
            let d = (luminance(*b) - luminance(*a)) as f64;
            d * d
        })
        .sum();
    let rms_diff = (diff_sq / n as f64).sqrt();
    let rms = current.rms_luminance();
    if rms <= f64::EPSILON {
        // both black -> converged, otherwise the image just went dark
        return if rms_diff <= f64::EPSILON { 0.0 } else { 1.0 };
    }
    rms_diff / rms
}

/// Exponentially smoothed frame delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceTracker {
    pub frame_delta: f64,
    /// Weight of each new measurement
    pub bias: f64,
    pub threshold: f64,
}

impl ConvergenceTracker {
    pub fn new(bias: f64, threshold: f64) -> Self {
        Self { frame_delta: 1.0, bias, threshold }
    }

    /// Fold in a measurement. Returns whether the delta is now below threshold.
    pub fn update(&mut self, measured: f64) -> bool {
        self.frame_delta = self.frame_delta * (1.0 - self.bias) + measured * self.bias;
        self.is_converged()
    }

    pub fn is_converged(&self) -> bool {
        self.frame_delta < self.threshold
    }

    pub fn reset(&mut self) {
        self.frame_delta = 1.0;
    }

    /// Updates needed from a delta of 1 with a constant measurement, if any.
    pub fn passes_to_converge(bias: f64, threshold: f64, measured: f64) -> Option<u32> {
        if measured >= threshold || bias <= 0.0 || bias > 1.0 {
            return None;
        }
        if threshold > 1.0 {
            return Some(0);
        }
        // delta_n = m + (1 - m)(1 - b)^n
        let n = ((threshold - measured) / (1.0 - measured)).ln() / (1.0 - bias).ln();
        Some(n.floor() as u32 + 1)
    }
}

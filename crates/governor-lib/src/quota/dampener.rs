//! Rate limiting and smoothing of guarantee changes

use serde::{Deserialize, Serialize};

/// Dampening knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DampeningConfig {
    /// Largest change per cycle as a fraction of the current guarantee
    pub max_change_rate: f64,
    /// Weight kept on the current value during exponential smoothing
    pub smoothing_factor: f64,
    /// Burst cooldown after a service releases burst capacity
    pub cooldown_ms: u64,
}

impl Default for DampeningConfig {
    fn default() -> Self {
        Self {
            max_change_rate: 0.2,
            smoothing_factor: 0.3,
            cooldown_ms: 5_000,
        }
    }
}

/// Result of dampening a proposed guarantee
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dampened {
    /// Proposed value after rate clamping, before smoothing
    pub clamped: f64,
    /// Final value after smoothing
    pub value: f64,
}

/// Limits how fast a guarantee may move between adjustment cycles
#[derive(Debug, Clone)]
pub struct AdjustmentDampener {
    max_change_rate: f64,
    smoothing_factor: f64,
}

impl AdjustmentDampener {
    pub fn new(max_change_rate: f64, smoothing_factor: f64) -> Self {
        Self {
            max_change_rate,
            smoothing_factor,
        }
    }

    pub fn from_config(config: &DampeningConfig) -> Self {
        Self::new(config.max_change_rate, config.smoothing_factor)
    }

    /// Clamp the change to `current * max_change_rate`, then smooth.
    ///
    /// A zero current value is not clamped, otherwise it could never grow.
    pub fn dampen(&self, current: f64, proposed: f64) -> Dampened {
        let clamped = if current <= f64::EPSILON {
            proposed
        } else {
            let max_delta = current * self.max_change_rate;
            current + (proposed - current).clamp(-max_delta, max_delta)
        };

        let value = current * self.smoothing_factor + clamped * (1.0 - self.smoothing_factor);
        Dampened { clamped, value }
    }
}

impl Default for AdjustmentDampener {
    fn default() -> Self {
        Self::from_config(&DampeningConfig::default())
    }
}

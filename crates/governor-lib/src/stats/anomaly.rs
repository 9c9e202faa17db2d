//! Sample anomaly detection
//!
//! Screens each incoming sample against the accepted history of its window.
//! Histories that look normally distributed are screened by z-score, all
//! others by Tukey's IQR fences.

use super::math;
use serde::{Deserialize, Serialize};

/// Minimum accepted history required before any sample is rejected
pub const DEFAULT_MIN_HISTORY: usize = 10;

/// Consecutive same-side anomalies treated as a level shift (one minute at 10s)
pub const DEFAULT_LEVEL_SHIFT_RUN: usize = 6;

/// Tuning knobs for the anomaly detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Absolute z-score above which a sample is anomalous
    pub z_threshold: f64,
    /// IQR fence multiplier (`k` in `Q1 - k*IQR`, `Q3 + k*IQR`)
    pub iqr_multiplier: f64,
    /// Largest |skewness| still treated as normal
    pub max_abs_skewness: f64,
    /// Largest |excess kurtosis| still treated as normal
    pub max_abs_excess_kurtosis: f64,
    pub min_history: usize,
    /// Consecutive anomalies on the same side of the bounds after which they
    /// are re-accepted as a new usage level. Zero disables the rule.
    pub level_shift_run: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            iqr_multiplier: 1.5,
            max_abs_skewness: 1.0,
            max_abs_excess_kurtosis: 2.0,
            min_history: DEFAULT_MIN_HISTORY,
            level_shift_run: DEFAULT_LEVEL_SHIFT_RUN,
        }
    }
}

/// Screening rule that produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ZScore,
    Iqr,
}

/// Details of a rejected sample
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAnomaly {
    pub value: f64,
    pub method: DetectionMethod,
    /// z-score for [`DetectionMethod::ZScore`], fence distance in IQRs for [`DetectionMethod::Iqr`]
    pub score: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl SampleAnomaly {
    /// Whether the value lies above the accepted range
    pub fn is_high(&self) -> bool {
        self.value > self.upper_bound
    }
}

/// Rejects outliers before they reach the statistics
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    pub fn is_anomaly(&self, value: f64, history: &[f64]) -> bool {
        self.detect(value, history).is_some()
    }

    /// Screen `value` against the accepted `history`
    ///
    /// # Returns
    /// * `Some(SampleAnomaly)` if the value falls outside the active rule's bounds
    /// * `None` if the value is accepted or the history is too short or flat to judge
    pub fn detect(&self, value: f64, history: &[f64]) -> Option<SampleAnomaly> {
        if !value.is_finite() {
            return Some(SampleAnomaly {
                value,
                method: DetectionMethod::ZScore,
                score: f64::INFINITY,
                lower_bound: f64::NEG_INFINITY,
                upper_bound: f64::INFINITY,
            });
        }

        if history.len() < self.config.min_history {
            return None;
        }

        let mean = math::mean(history);
        if self.looks_normal(history, mean) {
            self.detect_z_score(value, history, mean)
        } else {
            self.detect_iqr(value, history)
        }
    }

    fn looks_normal(&self, history: &[f64], mean: f64) -> bool {
        match math::shape(history, mean) {
            Some((skewness, excess_kurtosis)) => {
                skewness.abs() <= self.config.max_abs_skewness
                    && excess_kurtosis.abs() <= self.config.max_abs_excess_kurtosis
            }
            None => false,
        }
    }

    fn detect_z_score(&self, value: f64, history: &[f64], mean: f64) -> Option<SampleAnomaly> {
        let std_dev = math::std_dev(history, mean);
        if std_dev < f64::EPSILON {
            return None;
        }

        let z_score = (value - mean) / std_dev;
        if z_score.abs() > self.config.z_threshold {
            Some(SampleAnomaly {
                value,
                method: DetectionMethod::ZScore,
                score: z_score,
                lower_bound: mean - self.config.z_threshold * std_dev,
                upper_bound: mean + self.config.z_threshold * std_dev,
            })
        } else {
            None
        }
    }

    fn detect_iqr(&self, value: f64, history: &[f64]) -> Option<SampleAnomaly> {
        let sorted = math::sorted(history);
        let q1 = math::percentile_sorted(&sorted, 25.0);
        let q3 = math::percentile_sorted(&sorted, 75.0);
        let iqr = q3 - q1;
        if iqr < f64::EPSILON {
            return None;
        }

        let lower_bound = q1 - self.config.iqr_multiplier * iqr;
        let upper_bound = q3 + self.config.iqr_multiplier * iqr;

        let score = if value < lower_bound {
            (q1 - value) / iqr
        } else if value > upper_bound {
            (value - q3) / iqr
        } else {
            return None;
        };

        Some(SampleAnomaly {
            value,
            method: DetectionMethod::Iqr,
            score,
            lower_bound,
            upper_bound,
        })
    }
}

//! Online statistics pipeline
//!
//! This module provides:
//! - Rolling, time-bounded sample windows per service
//! - Anomaly screening (z-score or IQR depending on the history's shape)
//! - Level shift detection, so a sustained change is not filtered forever

mod anomaly;
mod math;
mod rolling;

pub use anomaly::{
    AnomalyConfig, AnomalyDetector, DetectionMethod, SampleAnomaly, DEFAULT_LEVEL_SHIFT_RUN,
    DEFAULT_MIN_HISTORY,
};
pub use rolling::{
    RecordOutcome, RollingMetrics, DEFAULT_MAX_SAMPLES, DEFAULT_TREND_SAMPLES,
    DEFAULT_WINDOW,
};

//! Per-service rolling window of resource samples
//!
//! Keeps every sample of the last `window` (anomalous ones included, for
//! audit) and derives [`ResourceStatistics`] from the accepted subset.
//! A run of anomalies on the same side of the accepted range is a level
//! shift: the run is re-accepted and the statistics follow the new level.

use super::anomaly::{AnomalyDetector, SampleAnomaly};
use super::math;
use crate::models::{ResourceKind, ResourceSample, ResourceStatistics};
use std::collections::VecDeque;
use std::time::Duration;

/// Default rolling window size (1 hour)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Default number of trailing samples in the short-term moving average
pub const DEFAULT_TREND_SAMPLES: usize = 5;

/// Hard cap on buffered samples regardless of window (24 hours at 10s)
pub const DEFAULT_MAX_SAMPLES: usize = 8640;

/// A sample as stored in the window
#[derive(Debug, Clone)]
struct RecordedSample {
    sample: ResourceSample,
    value: f64,
    anomalous: bool,
    high: bool,
}

/// Consecutive anomalies on one side of the accepted range
#[derive(Debug, Clone, Copy, PartialEq)]
struct AnomalyRun {
    high: bool,
    count: usize,
}

/// Outcome of recording a sample
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Accepted,
    Anomalous(SampleAnomaly),
    /// The sample completed a level shift; `reaccepted` samples rejoined the statistics
    LevelShift { reaccepted: usize },
}

/// Rolling window statistics for one service
#[derive(Debug, Clone)]
pub struct RollingMetrics {
    samples: VecDeque<RecordedSample>,
    kind: ResourceKind,
    window_ms: i64,
    trend_samples: usize,
    max_samples: usize,
    detector: AnomalyDetector,
    run: Option<AnomalyRun>,
    /// Total samples ever flagged anomalous, including evicted and re-accepted ones
    anomalies_total: u64,
}

impl RollingMetrics {
    pub fn new(kind: ResourceKind, window: Duration, detector: AnomalyDetector) -> Self {
        Self {
            samples: VecDeque::new(),
            kind,
            window_ms: window.as_millis() as i64,
            trend_samples: DEFAULT_TREND_SAMPLES,
            max_samples: DEFAULT_MAX_SAMPLES,
            detector,
            run: None,
            anomalies_total: 0,
        }
    }

    /// Set the short-term moving average length used for the trend
    pub fn with_trend_samples(mut self, trend_samples: usize) -> Self {
        self.trend_samples = trend_samples.max(1);
        self
    }

    /// Set the hard sample cap
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(1);
        self
    }

    /// Screen and record a sample.
    ///
    /// Anomalous samples are kept for audit but never feed the statistics,
    /// unless enough of them in a row land on the same side of the range.
    pub fn record(&mut self, sample: ResourceSample) -> RecordOutcome {
        self.expire_old_samples(sample.timestamp);

        let value = sample.value_of(&self.kind);
        let history = self.accepted_values();
        let verdict = self.detector.detect(value, &history);

        while self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }

        let anomalous = verdict.is_some();
        let high = verdict.as_ref().map(SampleAnomaly::is_high).unwrap_or(false);
        if anomalous {
            self.anomalies_total += 1;
        }
        self.insert_ordered(RecordedSample {
            sample,
            value,
            anomalous,
            high,
        });

        let Some(anomaly) = verdict else {
            self.run = None;
            return RecordOutcome::Accepted;
        };
        if !value.is_finite() {
            return RecordOutcome::Anomalous(anomaly);
        }

        let count = match self.run {
            Some(run) if run.high == high => run.count + 1,
            _ => 1,
        };
        let shift_after = self.detector.config().level_shift_run;
        if shift_after == 0 || count < shift_after {
            self.run = Some(AnomalyRun { high, count });
            return RecordOutcome::Anomalous(anomaly);
        }

        self.run = None;
        RecordOutcome::LevelShift {
            reaccepted: self.reaccept(high, count),
        }
    }

    /// Compute statistics as of `now_ms`, evicting expired samples first.
    ///
    /// Returns `None` when no accepted sample remains in the window.
    pub fn statistics(&mut self, now_ms: i64) -> Option<ResourceStatistics> {
        self.expire_old_samples(now_ms);

        let values = self.accepted_values();
        if values.is_empty() {
            return None;
        }

        let average = math::mean(&values);
        let sorted = math::sorted(&values);
        let stddev = math::std_dev(&values, average);

        Some(ResourceStatistics {
            average,
            median: math::percentile_sorted(&sorted, 50.0),
            p90: math::percentile_sorted(&sorted, 90.0),
            p95: math::percentile_sorted(&sorted, 95.0),
            peak: sorted.last().copied().unwrap_or(0.0),
            stddev,
            trend: self.trend(&values, average),
            sample_count: values.len(),
        })
    }

    /// Number of samples in the window, anomalous ones included
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of accepted samples currently in the window
    pub fn accepted_count(&self) -> usize {
        self.samples.iter().filter(|s| !s.anomalous).count()
    }

    /// Anomalous samples currently retained for audit
    pub fn anomalous_samples(&self) -> Vec<ResourceSample> {
        self.samples
            .iter()
            .filter(|s| s.anomalous)
            .map(|s| s.sample.clone())
            .collect()
    }

    pub fn anomalies_total(&self) -> u64 {
        self.anomalies_total
    }

    /// Relative deviation of the trailing moving average from the window average
    fn trend(&self, values: &[f64], average: f64) -> f64 {
        if values.len() < 2 || average.abs() < f64::EPSILON {
            return 0.0;
        }
        let take = self.trend_samples.min(values.len());
        let short_term = math::mean(&values[values.len() - take..]);
        ((short_term - average) / average).clamp(-1.0, 1.0)
    }

    /// Re-accept the newest `count` finite anomalies on one side of the range
    fn reaccept(&mut self, high: bool, count: usize) -> usize {
        let mut reaccepted = 0;
        for recorded in self.samples.iter_mut().rev() {
            if reaccepted == count {
                break;
            }
            if recorded.anomalous && recorded.high == high && recorded.value.is_finite() {
                recorded.anomalous = false;
                reaccepted += 1;
            }
        }
        reaccepted
    }

    fn accepted_values(&self) -> Vec<f64> {
        self.samples
            .iter()
            .filter(|s| !s.anomalous)
            .map(|s| s.value)
            .collect()
    }

    /// Keep the buffer time-ordered even when feeds deliver slightly out of order
    fn insert_ordered(&mut self, recorded: RecordedSample) {
        let ts = recorded.sample.timestamp;
        match self.samples.back() {
            Some(last) if last.sample.timestamp > ts => {
                let idx = self.samples.partition_point(|s| s.sample.timestamp <= ts);
                self.samples.insert(idx, recorded);
            }
            _ => self.samples.push_back(recorded),
        }
    }

    /// Remove samples outside the rolling window
    fn expire_old_samples(&mut self, current_time: i64) {
        let cutoff = current_time - self.window_ms;
        while let Some(front) = self.samples.front() {
            if front.sample.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

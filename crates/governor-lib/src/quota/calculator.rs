//! Turns rolling statistics and a tier policy into a guarantee

use super::dampener::AdjustmentDampener;
use crate::models::{AdaptiveQuota, ResourceStatistics, TierPolicy};

/// Weight of a positive trend on the baseline
const TREND_WEIGHT: f64 = 0.1;

/// Changes smaller than this are not published
const MIN_PUBLISHED_CHANGE: f64 = 1e-9;

/// Default minimum accepted samples before a quota is adjusted
pub const DEFAULT_MIN_SAMPLES: usize = 10;

/// A computed guarantee, ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaDecision {
    pub old_guarantee: f64,
    /// Guarantee after safety margin and floors, before dampening
    pub proposed: f64,
    pub new_guarantee: f64,
    pub reason: String,
    pub statistics: ResourceStatistics,
}

/// Computes guarantees once per adjustment cycle
#[derive(Debug, Clone)]
pub struct AdaptiveQuotaCalculator {
    dampener: AdjustmentDampener,
    min_samples: usize,
}

impl AdaptiveQuotaCalculator {
    pub fn new(dampener: AdjustmentDampener, min_samples: usize) -> Self {
        Self {
            dampener,
            min_samples,
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Undamped guarantee for the given statistics
    pub fn propose(&self, policy: &TierPolicy, base_minimum: f64, stats: &ResourceStatistics) -> f64 {
        let mut baseline = stats.select(policy.metric_type);
        if stats.trend > 0.0 {
            baseline *= 1.0 + stats.trend * TREND_WEIGHT;
        }

        (baseline * policy.safety_margin)
            .max(base_minimum)
            .max(policy.min_guarantee_ratio * stats.peak)
    }

    /// Compute the next guarantee for `quota`.
    ///
    /// Returns `None` when there is not enough data or the dampened value
    /// does not move the guarantee.
    pub fn calculate(
        &self,
        quota: &AdaptiveQuota,
        policy: &TierPolicy,
        stats: Option<&ResourceStatistics>,
    ) -> Option<QuotaDecision> {
        let stats = stats.filter(|s| s.sample_count >= self.min_samples)?;

        let current = quota.current_guarantee;
        let proposed = self.propose(policy, quota.base_minimum, stats);
        let new_guarantee = self
            .dampener
            .dampen(current, proposed)
            .value
            .max(quota.base_minimum);

        if (new_guarantee - current).abs() < MIN_PUBLISHED_CHANGE {
            return None;
        }

        Some(QuotaDecision {
            old_guarantee: current,
            proposed,
            new_guarantee,
            reason: describe(policy, stats, current, new_guarantee),
            statistics: *stats,
        })
    }
}

impl Default for AdaptiveQuotaCalculator {
    fn default() -> Self {
        Self::new(AdjustmentDampener::default(), DEFAULT_MIN_SAMPLES)
    }
}

/// Human-readable reason, e.g. "trend-adjusted p95 increase"
fn describe(policy: &TierPolicy, stats: &ResourceStatistics, old: f64, new: f64) -> String {
    let direction = if new > old { "increase" } else { "decrease" };
    if stats.trend > 0.0 {
        format!("trend-adjusted {} {}", policy.metric_type, direction)
    } else {
        format!("{} {}", policy.metric_type, direction)
    }
}

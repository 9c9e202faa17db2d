//! Adaptive quota computation
//!
//! - [`TierPolicyTable`]: tier assignments and per-tier knobs
//! - [`AdjustmentDampener`]: rate limiting and smoothing of changes
//! - [`AdaptiveQuotaCalculator`]: statistics + policy → guarantee

mod calculator;
mod dampener;
mod tier;

pub use calculator::{AdaptiveQuotaCalculator, QuotaDecision, DEFAULT_MIN_SAMPLES};
pub use dampener::{AdjustmentDampener, Dampened, DampeningConfig};
pub use tier::{default_policy, TierPolicyTable};

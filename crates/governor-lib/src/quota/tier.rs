//! Tier assignment and per-tier policies

use crate::error::{GovernorError, Result};
use crate::models::{MetricType, ServiceTier, TierPolicy};
use std::collections::HashMap;

/// Built-in policy for a tier
pub fn default_policy(tier: ServiceTier) -> TierPolicy {
    match tier {
        ServiceTier::Critical => TierPolicy {
            metric_type: MetricType::P95,
            safety_margin: 1.5,
            burst_ratio: 2.0,
            preemptible: false,
            min_guarantee_ratio: 1.0,
        },
        ServiceTier::Core => TierPolicy {
            metric_type: MetricType::P90,
            safety_margin: 1.3,
            burst_ratio: 1.5,
            preemptible: false,
            min_guarantee_ratio: 0.8,
        },
        ServiceTier::Standard => TierPolicy {
            metric_type: MetricType::Average,
            safety_margin: 1.2,
            burst_ratio: 1.5,
            preemptible: true,
            min_guarantee_ratio: 0.5,
        },
        ServiceTier::BestEffort => TierPolicy {
            metric_type: MetricType::Median,
            safety_margin: 1.0,
            burst_ratio: 1.0,
            preemptible: true,
            min_guarantee_ratio: 0.0,
        },
    }
}

/// Static table of tier policies and service tier assignments.
///
/// Read-only once the governor is running; all tier-dependent decisions are
/// lookups in this table.
#[derive(Debug, Clone)]
pub struct TierPolicyTable {
    policies: HashMap<ServiceTier, TierPolicy>,
    assignments: HashMap<String, ServiceTier>,
}

impl TierPolicyTable {
    /// Build a table from explicit policies; tiers without an entry use [`default_policy`]
    pub fn new(policies: HashMap<ServiceTier, TierPolicy>) -> Result<Self> {
        let mut table = Self {
            policies: ServiceTier::ALL
                .iter()
                .map(|tier| (*tier, default_policy(*tier)))
                .collect(),
            assignments: HashMap::new(),
        };
        table.policies.extend(policies);
        table.validate()?;
        Ok(table)
    }

    /// Assign a tier to a service
    pub fn assign(&mut self, service: impl Into<String>, tier: ServiceTier) {
        self.assignments.insert(service.into(), tier);
    }

    pub fn unassign(&mut self, service: &str) -> Option<ServiceTier> {
        self.assignments.remove(service)
    }

    pub fn tier_of(&self, service: &str) -> Option<ServiceTier> {
        self.assignments.get(service).copied()
    }

    pub fn policy(&self, tier: ServiceTier) -> &TierPolicy {
        // Every tier is populated in `new`
        &self.policies[&tier]
    }

    pub fn policy_for_service(&self, service: &str) -> Option<&TierPolicy> {
        self.tier_of(service).map(|tier| self.policy(tier))
    }

    /// Whether burst held by `holder` may be reclaimed for `requester`
    pub fn can_preempt(&self, requester: ServiceTier, holder: ServiceTier) -> bool {
        holder < requester && self.policy(holder).preemptible
    }

    fn validate(&self) -> Result<()> {
        for (tier, policy) in &self.policies {
            if !(policy.burst_ratio >= 1.0) {
                return Err(GovernorError::InvalidConfiguration(format!(
                    "tier {} has burst_ratio {} (must be >= 1)",
                    tier, policy.burst_ratio
                )));
            }
            if !(policy.safety_margin > 0.0) || !policy.safety_margin.is_finite() {
                return Err(GovernorError::InvalidConfiguration(format!(
                    "tier {} has safety_margin {} (must be > 0)",
                    tier, policy.safety_margin
                )));
            }
            if !(0.0..=1.0).contains(&policy.min_guarantee_ratio) {
                return Err(GovernorError::InvalidConfiguration(format!(
                    "tier {} has min_guarantee_ratio {} (must be within [0, 1])",
                    tier, policy.min_guarantee_ratio
                )));
            }
        }
        Ok(())
    }
}

impl Default for TierPolicyTable {
    fn default() -> Self {
        Self {
            policies: ServiceTier::ALL
                .iter()
                .map(|tier| (*tier, default_policy(*tier)))
                .collect(),
            assignments: HashMap::new(),
        }
    }
}

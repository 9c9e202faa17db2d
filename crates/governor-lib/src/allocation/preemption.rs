//! Reclaiming burst capacity from lower-priority holders

use super::pool::{BurstGrant, CAPACITY_EPSILON};
use crate::models::ServiceTier;
use crate::quota::TierPolicyTable;

/// Capacity to take from one grant
#[derive(Debug, Clone, PartialEq)]
pub struct Reclaim {
    pub allocation_id: u64,
    pub service: String,
    pub amount: f64,
    /// Burst the grant keeps after the reclaim
    pub remaining: f64,
}

/// Capacity sources that together cover a burst request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreemptionPlan {
    /// Taken from free pool capacity
    pub from_free: f64,
    pub reclaims: Vec<Reclaim>,
}

impl PreemptionPlan {
    pub fn reclaimed(&self) -> f64 {
        self.reclaims.iter().map(|r| r.amount).sum()
    }
}

/// Selects victims for a burst request that the free pool cannot cover.
///
/// Only burst grants of strictly lower, preemptible tiers are eligible.
/// Victims are taken lowest tier first, then oldest grant first, and just
/// enough is reclaimed to cover the shortfall.
pub struct PreemptionEngine<'a> {
    policies: &'a TierPolicyTable,
}

impl<'a> PreemptionEngine<'a> {
    pub fn new(policies: &'a TierPolicyTable) -> Self {
        Self { policies }
    }

    /// Grants `requester` may reclaim from, in reclaim order
    pub fn candidates<'g>(
        &self,
        requester: ServiceTier,
        grants: impl IntoIterator<Item = &'g BurstGrant>,
    ) -> Vec<&'g BurstGrant> {
        let mut eligible: Vec<&BurstGrant> = grants
            .into_iter()
            .filter(|g| g.amount > CAPACITY_EPSILON)
            .filter(|g| self.policies.can_preempt(requester, g.tier))
            .collect();

        eligible.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then(a.granted_at.cmp(&b.granted_at))
                .then(a.allocation_id.cmp(&b.allocation_id))
        });
        eligible
    }

    /// Plan how to cover `needed` burst.
    ///
    /// Returns `None` when free capacity plus every eligible grant falls short.
    pub fn plan<'g>(
        &self,
        requester: ServiceTier,
        needed: f64,
        available: f64,
        grants: impl IntoIterator<Item = &'g BurstGrant>,
    ) -> Option<PreemptionPlan> {
        let from_free = available.min(needed).max(0.0);
        let mut shortfall = needed - from_free;
        let mut reclaims = Vec::new();

        for grant in self.candidates(requester, grants) {
            if shortfall <= CAPACITY_EPSILON {
                break;
            }
            let amount = grant.amount.min(shortfall);
            shortfall -= amount;
            reclaims.push(Reclaim {
                allocation_id: grant.allocation_id,
                service: grant.service.clone(),
                amount,
                remaining: grant.amount - amount,
            });
        }

        if shortfall > CAPACITY_EPSILON {
            return None;
        }
        Some(PreemptionPlan {
            from_free,
            reclaims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(id: u64, service: &str, tier: ServiceTier, amount: f64, granted_at: i64) -> BurstGrant {
        BurstGrant {
            allocation_id: id,
            service: service.to_string(),
            tier,
            amount,
            granted_at,
        }
    }

    #[test]
    fn test_only_lower_preemptible_tiers_are_candidates() {
        let table = TierPolicyTable::default();
        let engine = PreemptionEngine::new(&table);
        let grants = vec![
            grant(1, "core", ServiceTier::Core, 10.0, 1),
            grant(2, "std", ServiceTier::Standard, 10.0, 2),
            grant(3, "be", ServiceTier::BestEffort, 10.0, 3),
            grant(4, "crit", ServiceTier::Critical, 10.0, 4),
        ];

        let ids: Vec<u64> = engine
            .candidates(ServiceTier::Critical, &grants)
            .iter()
            .map(|g| g.allocation_id)
            .collect();
        assert_eq!(ids, vec![3, 2]);

        let ids: Vec<u64> = engine
            .candidates(ServiceTier::Standard, &grants)
            .iter()
            .map(|g| g.allocation_id)
            .collect();
        assert_eq!(ids, vec![3]);

        assert!(engine.candidates(ServiceTier::BestEffort, &grants).is_empty());
    }

    #[test]
    fn test_oldest_grant_first_within_tier() {
        let table = TierPolicyTable::default();
        let engine = PreemptionEngine::new(&table);
        let grants = vec![
            grant(7, "newer", ServiceTier::BestEffort, 100.0, 2_000),
            grant(3, "older", ServiceTier::BestEffort, 100.0, 1_000),
        ];

        let plan = engine.plan(ServiceTier::Critical, 100.0, 0.0, &grants).unwrap();
        assert_eq!(plan.reclaims.len(), 1);
        assert_eq!(plan.reclaims[0].service, "older");
        assert_eq!(plan.reclaims[0].remaining, 0.0);
    }

    #[test]
    fn test_free_capacity_used_first() {
        let table = TierPolicyTable::default();
        let engine = PreemptionEngine::new(&table);
        let grants = vec![grant(1, "be", ServiceTier::BestEffort, 100.0, 1)];

        let plan = engine.plan(ServiceTier::Critical, 150.0, 50.0, &grants).unwrap();
        assert_eq!(plan.from_free, 50.0);
        assert_eq!(plan.reclaimed(), 100.0);
    }

    #[test]
    fn test_partial_reclaim_across_holders() {
        let table = TierPolicyTable::default();
        let engine = PreemptionEngine::new(&table);
        let grants = vec![
            grant(1, "be-a", ServiceTier::BestEffort, 30.0, 1),
            grant(2, "be-b", ServiceTier::BestEffort, 30.0, 2),
            grant(3, "std", ServiceTier::Standard, 50.0, 0),
        ];

        let plan = engine.plan(ServiceTier::Core, 80.0, 0.0, &grants).unwrap();
        let taken: Vec<(u64, f64, f64)> = plan
            .reclaims
            .iter()
            .map(|r| (r.allocation_id, r.amount, r.remaining))
            .collect();
        // All BestEffort first, then the Standard holder only partially
        assert_eq!(taken, vec![(1, 30.0, 0.0), (2, 30.0, 0.0), (3, 20.0, 30.0)]);
    }

    #[test]
    fn test_insufficient_victims() {
        let table = TierPolicyTable::default();
        let engine = PreemptionEngine::new(&table);
        let grants = vec![
            grant(1, "be", ServiceTier::BestEffort, 30.0, 1),
            grant(2, "core", ServiceTier::Core, 500.0, 2),
        ];

        assert!(engine.plan(ServiceTier::Critical, 100.0, 20.0, &grants).is_none());
    }

    #[test]
    fn test_empty_grants_skipped() {
        let table = TierPolicyTable::default();
        let engine = PreemptionEngine::new(&table);
        let grants = vec![grant(1, "be", ServiceTier::BestEffort, 0.0, 1)];
        assert!(engine.candidates(ServiceTier::Critical, &grants).is_empty());
    }
}

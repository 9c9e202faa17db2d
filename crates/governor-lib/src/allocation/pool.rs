//! Shared burst reservoir
//!
//! Every burst grant of every service is tracked here, under a single
//! pool-wide lock. Holding the pool lock is therefore enough to inspect and
//! reclaim any service's burst.

use crate::models::ServiceTier;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tolerance for floating point capacity checks
pub(crate) const CAPACITY_EPSILON: f64 = 1e-9;

/// Burst capacity held by one allocation
#[derive(Debug, Clone, PartialEq)]
pub struct BurstGrant {
    pub allocation_id: u64,
    pub service: String,
    pub tier: ServiceTier,
    pub amount: f64,
    /// Unix timestamp in milliseconds
    pub granted_at: i64,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstUtilization {
    pub total_capacity: f64,
    pub allocated: f64,
    pub available: f64,
    /// Burst held per service
    pub holders: HashMap<String, f64>,
}

#[derive(Debug, Default)]
struct PoolState {
    total_capacity: f64,
    allocated: f64,
    grants: BTreeMap<u64, BurstGrant>,
    holders: HashMap<String, f64>,
    cooldown_until: HashMap<String, Instant>,
}

/// Thread-safe burst reservoir
#[derive(Debug)]
pub struct BurstPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
    lock_acquisitions: AtomicU64,
}

impl BurstPool {
    pub fn new(total_capacity: f64, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState {
                total_capacity: total_capacity.max(0.0),
                ..Default::default()
            }),
            cooldown,
            lock_acquisitions: AtomicU64::new(0),
        }
    }

    /// Acquire the pool lock
    pub fn lock(&self) -> PoolGuard<'_> {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        PoolGuard {
            state: self.state.lock(),
            cooldown: self.cooldown,
        }
    }

    /// Number of times the pool lock has been taken
    pub fn lock_acquisitions(&self) -> u64 {
        self.lock_acquisitions.load(Ordering::Relaxed)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn utilization(&self) -> BurstUtilization {
        self.lock().utilization()
    }

    /// Reserve `amount` for an allocation if capacity allows
    pub fn allocate(&self, grant: BurstGrant) -> bool {
        self.lock().grant(grant)
    }

    /// Release an allocation's grant, returning the credited amount
    pub fn release(&self, allocation_id: u64) -> Option<f64> {
        self.lock().release(allocation_id, Instant::now()).map(|g| g.amount)
    }
}

/// Exclusive access to the pool state
pub struct PoolGuard<'a> {
    state: MutexGuard<'a, PoolState>,
    cooldown: Duration,
}

impl PoolGuard<'_> {
    pub fn total_capacity(&self) -> f64 {
        self.state.total_capacity
    }

    pub fn allocated(&self) -> f64 {
        self.state.allocated
    }

    pub fn available(&self) -> f64 {
        (self.state.total_capacity - self.state.allocated).max(0.0)
    }

    /// Burst currently held by a service
    pub fn held_by(&self, service: &str) -> f64 {
        self.state.holders.get(service).copied().unwrap_or(0.0)
    }

    pub fn in_cooldown(&self, service: &str, now: Instant) -> bool {
        self.state
            .cooldown_until
            .get(service)
            .map(|until| now < *until)
            .unwrap_or(false)
    }

    /// Grants in allocation id order
    pub fn grants(&self) -> impl Iterator<Item = &BurstGrant> {
        self.state.grants.values()
    }

    pub fn grant_for(&self, allocation_id: u64) -> Option<&BurstGrant> {
        self.state.grants.get(&allocation_id)
    }

    /// Record a new grant. Fails without side effects if capacity is short.
    pub fn grant(&mut self, grant: BurstGrant) -> bool {
        if grant.amount <= 0.0 {
            return true;
        }
        if grant.amount > self.available() + CAPACITY_EPSILON {
            return false;
        }

        let state = &mut *self.state;
        state.allocated = (state.allocated + grant.amount).min(state.total_capacity);
        *state.holders.entry(grant.service.clone()).or_insert(0.0) += grant.amount;
        state.grants.insert(grant.allocation_id, grant);
        true
    }

    /// Take up to `amount` from a grant.
    ///
    /// Returns the amount actually reclaimed. The grant stays registered
    /// (possibly at zero) until its allocation is released.
    pub fn reclaim(&mut self, allocation_id: u64, amount: f64) -> f64 {
        let state = &mut *self.state;
        let Some(grant) = state.grants.get_mut(&allocation_id) else {
            return 0.0;
        };

        let taken = amount.min(grant.amount).max(0.0);
        grant.amount -= taken;
        state.allocated = (state.allocated - taken).max(0.0);
        if let Some(held) = state.holders.get_mut(&grant.service) {
            *held = (*held - taken).max(0.0);
            if *held <= CAPACITY_EPSILON {
                state.holders.remove(&grant.service);
            }
        }
        taken
    }

    /// Remove a grant and credit what remains of it.
    ///
    /// Starts the holder's cooldown when burst capacity was returned.
    pub fn release(&mut self, allocation_id: u64, now: Instant) -> Option<BurstGrant> {
        let remaining = self.state.grants.get(&allocation_id)?.amount;
        self.reclaim(allocation_id, remaining);

        let grant = self.state.grants.remove(&allocation_id)?;
        if remaining > CAPACITY_EPSILON {
            self.state
                .cooldown_until
                .insert(grant.service.clone(), now + self.cooldown);
        }
        Some(BurstGrant {
            amount: remaining,
            ..grant
        })
    }

    /// Drop every grant and cooldown of a service, returning the credited burst
    pub fn release_service(&mut self, service: &str) -> f64 {
        let ids: Vec<u64> = self
            .state
            .grants
            .values()
            .filter(|g| g.service == service)
            .map(|g| g.allocation_id)
            .collect();

        let mut credited = 0.0;
        for id in ids {
            if let Some(amount) = self.state.grants.get(&id).map(|g| g.amount) {
                credited += self.reclaim(id, amount);
            }
            self.state.grants.remove(&id);
        }
        self.state.holders.remove(service);
        self.state.cooldown_until.remove(service);
        credited
    }

    /// Carve capacity out of the pool. Fails if it would drop below what is allocated.
    pub fn shrink(&mut self, amount: f64) -> bool {
        if amount > self.available() + CAPACITY_EPSILON {
            return false;
        }
        self.state.total_capacity = (self.state.total_capacity - amount).max(self.state.allocated);
        true
    }

    /// Return capacity to the pool
    pub fn grow(&mut self, amount: f64) {
        self.state.total_capacity += amount.max(0.0);
    }

    /// Check that grants, holder totals and `allocated` agree
    pub fn audit(&self) -> Result<(), String> {
        let state = &*self.state;
        let tolerance = 1e-6 * (1.0 + state.total_capacity);
        let granted: f64 = state.grants.values().map(|g| g.amount).sum();
        let held: f64 = state.holders.values().sum();

        if state.allocated > state.total_capacity + tolerance {
            return Err(format!(
                "allocated {} exceeds capacity {}",
                state.allocated, state.total_capacity
            ));
        }
        if (granted - state.allocated).abs() > tolerance {
            return Err(format!(
                "grants total {} but allocated is {}",
                granted, state.allocated
            ));
        }
        if (held - state.allocated).abs() > tolerance {
            return Err(format!(
                "holders total {} but allocated is {}",
                held, state.allocated
            ));
        }
        Ok(())
    }

    pub fn utilization(&self) -> BurstUtilization {
        BurstUtilization {
            total_capacity: self.total_capacity(),
            allocated: self.allocated(),
            available: self.available(),
            holders: self.state.holders.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(id: u64, service: &str, tier: ServiceTier, amount: f64) -> BurstGrant {
        BurstGrant {
            allocation_id: id,
            service: service.to_string(),
            tier,
            amount,
            granted_at: id as i64,
        }
    }

    #[test]
    fn test_grant_within_capacity() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        assert!(pool.allocate(grant(1, "a", ServiceTier::Core, 60.0)));
        assert!(!pool.allocate(grant(2, "b", ServiceTier::Core, 50.0)));
        assert!(pool.allocate(grant(3, "b", ServiceTier::Core, 40.0)));

        let usage = pool.utilization();
        assert_eq!(usage.allocated, 100.0);
        assert_eq!(usage.available, 0.0);
        assert_eq!(usage.holders["a"], 60.0);
        assert_eq!(usage.holders["b"], 40.0);
    }

    #[test]
    fn test_audit_detects_drift() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        let mut guard = pool.lock();
        guard.grant(grant(1, "a", ServiceTier::Core, 30.0));
        guard.grant(grant(2, "b", ServiceTier::BestEffort, 20.0));
        guard.reclaim(2, 5.0);
        assert!(guard.audit().is_ok());

        guard.state.allocated += 10.0;
        let drift = guard.audit().unwrap_err();
        assert!(drift.contains("grants total 45"));

        guard.state.allocated = 150.0;
        assert!(guard.audit().unwrap_err().contains("exceeds capacity"));
    }

    #[test]
    fn test_release_credits_once() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        pool.allocate(grant(1, "a", ServiceTier::Core, 30.0));

        assert_eq!(pool.release(1), Some(30.0));
        assert_eq!(pool.release(1), None);
        assert_eq!(pool.utilization().allocated, 0.0);
    }

    #[test]
    fn test_release_starts_cooldown() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        let now = Instant::now();
        {
            let mut guard = pool.lock();
            guard.grant(grant(1, "a", ServiceTier::Core, 30.0));
            guard.release(1, now);
            assert!(guard.in_cooldown("a", now + Duration::from_secs(1)));
            assert!(!guard.in_cooldown("a", now + Duration::from_secs(6)));
            assert!(!guard.in_cooldown("b", now));
        }
    }

    #[test]
    fn test_partial_reclaim_keeps_grant() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        let mut guard = pool.lock();
        guard.grant(grant(1, "a", ServiceTier::BestEffort, 40.0));

        assert_eq!(guard.reclaim(1, 25.0), 25.0);
        assert_eq!(guard.grant_for(1).map(|g| g.amount), Some(15.0));
        assert_eq!(guard.held_by("a"), 15.0);
        assert_eq!(guard.allocated(), 15.0);

        // Over-asking only takes what is left
        assert_eq!(guard.reclaim(1, 100.0), 15.0);
        assert_eq!(guard.held_by("a"), 0.0);

        // A fully reclaimed grant releases without credit or cooldown
        let now = Instant::now();
        assert_eq!(guard.release(1, now).map(|g| g.amount), Some(0.0));
        assert!(!guard.in_cooldown("a", now));
    }

    #[test]
    fn test_release_service() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        let mut guard = pool.lock();
        guard.grant(grant(1, "a", ServiceTier::Standard, 10.0));
        guard.grant(grant(2, "a", ServiceTier::Standard, 20.0));
        guard.grant(grant(3, "b", ServiceTier::Standard, 5.0));

        assert_eq!(guard.release_service("a"), 30.0);
        assert_eq!(guard.allocated(), 5.0);
        assert_eq!(guard.grants().count(), 1);
    }

    #[test]
    fn test_shrink_and_grow() {
        let pool = BurstPool::new(100.0, Duration::from_secs(5));
        let mut guard = pool.lock();
        guard.grant(grant(1, "a", ServiceTier::Core, 70.0));

        assert!(!guard.shrink(40.0));
        assert!(guard.shrink(30.0));
        assert_eq!(guard.total_capacity(), 70.0);
        guard.grow(50.0);
        assert_eq!(guard.available(), 50.0);
    }

    #[test]
    fn test_lock_acquisitions_counted() {
        let pool = BurstPool::new(10.0, Duration::from_secs(1));
        let before = pool.lock_acquisitions();
        let _ = pool.utilization();
        let _ = pool.lock();
        assert_eq!(pool.lock_acquisitions(), before + 2);
    }
}

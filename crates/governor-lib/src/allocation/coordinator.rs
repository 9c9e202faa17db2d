//! Four-phase admission
//!
//! 1. Guaranteed: served from the service's own remaining guarantee, without
//!    touching the pool lock.
//! 2. Burst: the shortfall comes from free pool capacity, within the
//!    service's burst ceiling.
//! 3. Preemption: burst is reclaimed from lower, preemptible tiers.
//! 4. Overflow: fail fast, or wait for capacity until the caller's deadline.
//!
//! Locks are always taken service first, then pool.

use super::pool::{BurstGrant, BurstPool, CAPACITY_EPSILON};
use super::preemption::PreemptionEngine;
use crate::error::{GovernorError, InsufficientReason, Result};
use crate::models::{
    unix_millis, AdjustmentRecord, AdmissionPhase, Allocation, PreemptionNotice, ResourceRequest,
    ResourceStatistics,
};
use crate::quota::TierPolicyTable;
use crate::registry::{LiveAllocation, ServiceEntry, ServiceRegistry};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error};

/// A granted allocation and the reclaims it caused
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub allocation: Allocation,
    pub preempted: Vec<PreemptionNotice>,
}

/// Capacity returned by a release
#[derive(Debug, Clone, PartialEq)]
pub struct Released {
    pub allocation_id: u64,
    pub service: String,
    pub guaranteed: f64,
    pub burst: f64,
}

/// A guarantee change and the burst it took back
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub record: AdjustmentRecord,
    pub max_burst: f64,
    /// Burst reclaimed because it no longer fit under `max_burst`
    pub reclaimed: Vec<PreemptionNotice>,
}

/// Public entry point for allocation and release
pub struct AllocationCoordinator {
    registry: Arc<ServiceRegistry>,
    pool: Arc<BurstPool>,
    policies: Arc<RwLock<TierPolicyTable>>,
    next_id: AtomicU64,
    capacity_freed: Notify,
    recheck_interval: Duration,
}

impl AllocationCoordinator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        pool: Arc<BurstPool>,
        policies: Arc<RwLock<TierPolicyTable>>,
        recheck_interval: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            policies,
            next_id: AtomicU64::new(1),
            capacity_freed: Notify::new(),
            recheck_interval,
        }
    }

    pub fn pool(&self) -> &BurstPool {
        &self.pool
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Add a service, carving its base minimum out of the burst pool
    pub fn register(&self, entry: ServiceEntry) -> Result<()> {
        let name = entry.name.clone();
        let base_minimum = entry.quota().base_minimum;
        let tier = entry.tier;

        if self.registry.contains(&name) {
            return Err(GovernorError::InvalidConfiguration(format!(
                "service {} is already registered",
                name
            )));
        }
        if !self.pool.lock().shrink(base_minimum) {
            return Err(GovernorError::insufficient(
                &name,
                base_minimum,
                InsufficientReason::Exhausted,
            ));
        }
        if !self.registry.register(entry) {
            self.pool.lock().grow(base_minimum);
            return Err(GovernorError::InvalidConfiguration(format!(
                "service {} is already registered",
                name
            )));
        }

        self.policies.write().assign(name, tier);
        Ok(())
    }

    /// Remove a service and return its base minimum and burst to the pool
    pub fn deregister(&self, name: &str) -> Result<Arc<ServiceEntry>> {
        let entry = self
            .registry
            .unregister(name)
            .ok_or_else(|| GovernorError::UnknownService(name.to_string()))?;

        {
            let mut state = entry.state.lock();
            let mut pool = self.pool.lock();
            let credited = pool.release_service(name);
            pool.grow(state.quota.base_minimum);
            state.allocations.clear();
            state.guaranteed_in_use = 0.0;
            debug!(service = %name, burst_credited = credited, "Service capacity returned to pool");
        }

        self.policies.write().unassign(name);
        self.notify_capacity();
        Ok(entry)
    }

    /// Publish a recalculated guarantee for a service.
    ///
    /// The guarantee never drops below what the service already has in use.
    /// Burst held above the new ceiling is reclaimed, newest grant first; those
    /// notices name the service itself as `preempted_by`. Returns `None` when
    /// the guarantee does not move.
    pub fn publish_guarantee(
        &self,
        entry: &ServiceEntry,
        guarantee: f64,
        burst_ratio: f64,
        reason: String,
        statistics: Option<ResourceStatistics>,
        now_ms: i64,
    ) -> Option<Published> {
        let mut state = entry.state.lock();
        let guarantee = guarantee
            .max(state.guaranteed_in_use)
            .max(state.quota.base_minimum);
        if (guarantee - state.quota.current_guarantee).abs() < CAPACITY_EPSILON {
            return None;
        }

        let record = state
            .quota
            .apply(guarantee, burst_ratio, reason, statistics, now_ms);
        let max_burst = state.quota.max_burst;

        let mut pool = self.pool.lock();
        let mut excess = pool.held_by(&entry.name) - max_burst;
        let mut reclaimed = Vec::new();
        if excess > CAPACITY_EPSILON {
            let mut grants: Vec<(u64, i64, f64)> = pool
                .grants()
                .filter(|g| g.service == entry.name && g.amount > 0.0)
                .map(|g| (g.allocation_id, g.granted_at, g.amount))
                .collect();
            grants.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

            for (allocation_id, _, amount) in grants {
                if excess <= CAPACITY_EPSILON {
                    break;
                }
                let taken = pool.reclaim(allocation_id, excess.min(amount));
                excess -= taken;
                reclaimed.push(PreemptionNotice {
                    allocation_id,
                    service: entry.name.clone(),
                    reclaimed: taken,
                    remaining_burst: amount - taken,
                    preempted_by: entry.name.clone(),
                    timestamp: now_ms,
                });
            }
        }

        Some(Published {
            record,
            max_burst,
            reclaimed,
        })
    }

    /// Single admission attempt, without waiting
    pub fn try_allocate(&self, service: &str, amount: f64) -> Result<Admission> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(GovernorError::InvalidRequest(format!(
                "requested amount must be positive, got {}",
                amount
            )));
        }

        let entry = self
            .registry
            .get(service)
            .ok_or_else(|| GovernorError::UnknownService(service.to_string()))?;

        let mut state = entry.state.lock();
        let remaining = state.remaining_guarantee();
        let granted_at = unix_millis();

        // Phase 1
        if amount <= remaining + CAPACITY_EPSILON {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.guaranteed_in_use += amount;
            state.allocations.insert(
                id,
                LiveAllocation {
                    guaranteed: amount,
                    granted_at,
                    phase: AdmissionPhase::Guaranteed,
                },
            );
            return Ok(Admission {
                allocation: Allocation {
                    id,
                    service: service.to_string(),
                    guaranteed: amount,
                    burst: 0.0,
                    granted_at,
                    phase: AdmissionPhase::Guaranteed,
                },
                preempted: Vec::new(),
            });
        }

        let burst_needed = amount - remaining;
        let mut pool = self.pool.lock();

        if pool.in_cooldown(service, Instant::now()) {
            return Err(GovernorError::insufficient(
                service,
                amount,
                InsufficientReason::Cooldown,
            ));
        }
        if burst_needed > state.quota.max_burst - pool.held_by(service) + CAPACITY_EPSILON {
            return Err(GovernorError::insufficient(
                service,
                amount,
                InsufficientReason::BurstCeiling,
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut preempted = Vec::new();

        // Phase 2, falling back to phase 3
        let phase = if burst_needed <= pool.available() + CAPACITY_EPSILON {
            AdmissionPhase::Burst
        } else {
            let plan = {
                let policies = self.policies.read();
                let tier = policies.tier_of(service).unwrap_or(entry.tier);
                PreemptionEngine::new(&policies).plan(
                    tier,
                    burst_needed,
                    pool.available(),
                    pool.grants(),
                )
            };
            let Some(plan) = plan else {
                return Err(GovernorError::insufficient(
                    service,
                    amount,
                    InsufficientReason::Exhausted,
                ));
            };

            for reclaim in &plan.reclaims {
                let taken = pool.reclaim(reclaim.allocation_id, reclaim.amount);
                preempted.push(PreemptionNotice {
                    allocation_id: reclaim.allocation_id,
                    service: reclaim.service.clone(),
                    reclaimed: taken,
                    remaining_burst: reclaim.remaining,
                    preempted_by: service.to_string(),
                    timestamp: granted_at,
                });
            }
            AdmissionPhase::Preemption
        };

        let granted = pool.grant(BurstGrant {
            allocation_id: id,
            service: service.to_string(),
            tier: entry.tier,
            amount: burst_needed,
            granted_at,
        });
        if !granted {
            // Capacity was checked under this same pool lock
            error!(
                service = %service,
                burst = burst_needed,
                available = pool.available(),
                "Burst grant refused after capacity check"
            );
            return Err(GovernorError::insufficient(
                service,
                amount,
                InsufficientReason::Exhausted,
            ));
        }
        drop(pool);

        state.guaranteed_in_use += remaining;
        state.allocations.insert(
            id,
            LiveAllocation {
                guaranteed: remaining,
                granted_at,
                phase,
            },
        );

        Ok(Admission {
            allocation: Allocation {
                id,
                service: service.to_string(),
                guaranteed: remaining,
                burst: burst_needed,
                granted_at,
                phase,
            },
            preempted,
        })
    }

    /// Admit a request, waiting for capacity up to `request.max_wait`
    pub async fn allocate(&self, service: &str, request: &ResourceRequest) -> Result<Admission> {
        let deadline = request.max_wait.map(|wait| tokio::time::Instant::now() + wait);

        loop {
            let notified = self.capacity_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let err = match self.try_allocate(service, request.amount) {
                Ok(admission) => return Ok(admission),
                Err(err) => err,
            };

            let Some(deadline) = deadline else {
                return Err(err);
            };
            if err.insufficient_reason().is_none() {
                return Err(err);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(GovernorError::insufficient(
                    service,
                    request.amount,
                    InsufficientReason::DeadlineExceeded,
                ));
            }

            let pause = self.recheck_interval.min(deadline - now);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Release an allocation. Releasing twice fails with `UnknownAllocation`.
    pub fn release(&self, allocation: &Allocation) -> Result<Released> {
        let entry = self
            .registry
            .get(&allocation.service)
            .ok_or(GovernorError::UnknownAllocation(allocation.id))?;

        let released = {
            let mut state = entry.state.lock();
            let live = state
                .allocations
                .remove(&allocation.id)
                .ok_or(GovernorError::UnknownAllocation(allocation.id))?;
            state.guaranteed_in_use = (state.guaranteed_in_use - live.guaranteed).max(0.0);

            let burst = if live.phase == AdmissionPhase::Guaranteed {
                0.0
            } else {
                self.pool
                    .lock()
                    .release(allocation.id, Instant::now())
                    .map(|grant| grant.amount)
                    .unwrap_or(0.0)
            };

            Released {
                allocation_id: allocation.id,
                service: allocation.service.clone(),
                guaranteed: live.guaranteed,
                burst,
            }
        };

        self.notify_capacity();
        Ok(released)
    }

    /// Current view of a live allocation; burst shrinks after preemption
    pub fn allocation(&self, service: &str, allocation_id: u64) -> Option<Allocation> {
        let entry = self.registry.get(service)?;
        let state = entry.state.lock();
        let live = state.allocations.get(&allocation_id)?;

        let burst = if live.phase == AdmissionPhase::Guaranteed {
            0.0
        } else {
            self.pool
                .lock()
                .grant_for(allocation_id)
                .map(|grant| grant.amount)
                .unwrap_or(0.0)
        };

        Some(Allocation {
            id: allocation_id,
            service: service.to_string(),
            guaranteed: live.guaranteed,
            burst,
            granted_at: live.granted_at,
            phase: live.phase,
        })
    }

    /// Wake requests waiting in the overflow phase
    pub fn notify_capacity(&self) {
        self.capacity_freed.notify_waiters();
    }
}

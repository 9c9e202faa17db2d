//! Registry of governed services
//!
//! Each service owns two independent locks: one over its quota and
//! guaranteed counters, one over its rolling metrics. Burst holdings live in
//! the [`BurstPool`](crate::allocation::BurstPool), never here.

use crate::models::{AdaptiveQuota, AdmissionPhase, ServiceTier};
use crate::stats::RollingMetrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Guaranteed portion of a live allocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LiveAllocation {
    pub guaranteed: f64,
    pub granted_at: i64,
    pub phase: AdmissionPhase,
}

/// Quota state guarded by the per-service lock
#[derive(Debug)]
pub(crate) struct ServiceState {
    pub quota: AdaptiveQuota,
    pub guaranteed_in_use: f64,
    pub allocations: HashMap<u64, LiveAllocation>,
}

impl ServiceState {
    pub fn remaining_guarantee(&self) -> f64 {
        (self.quota.current_guarantee - self.guaranteed_in_use).max(0.0)
    }
}

/// A registered service
#[derive(Debug)]
pub struct ServiceEntry {
    pub name: String,
    pub tier: ServiceTier,
    pub fd_limit: Option<u64>,
    pub(crate) state: Mutex<ServiceState>,
    pub(crate) metrics: Mutex<RollingMetrics>,
}

impl ServiceEntry {
    pub(crate) fn new(
        name: impl Into<String>,
        quota: AdaptiveQuota,
        fd_limit: Option<u64>,
        metrics: RollingMetrics,
    ) -> Self {
        Self {
            name: name.into(),
            tier: quota.tier,
            fd_limit,
            state: Mutex::new(ServiceState {
                quota,
                guaranteed_in_use: 0.0,
                allocations: HashMap::new(),
            }),
            metrics: Mutex::new(metrics),
        }
    }

    /// Copy of the current quota
    pub fn quota(&self) -> AdaptiveQuota {
        self.state.lock().quota.clone()
    }

    pub fn guaranteed_in_use(&self) -> f64 {
        self.state.lock().guaranteed_in_use
    }
}

/// Map of service name to entry
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service; returns false if the name is taken
    pub fn register(&self, entry: ServiceEntry) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.services.entry(entry.name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!(service = %entry.name, tier = %entry.tier, "Registering service");
                slot.insert(Arc::new(entry));
                true
            }
        }
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        debug!(service = %name, "Unregistering service");
        self.services.remove(name).map(|(_, v)| v)
    }

    /// Look up a service. The map shard is released before returning.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// All services, sorted by name
    pub fn list(&self) -> Vec<Arc<ServiceEntry>> {
        let mut entries: Vec<_> = self.services.iter().map(|r| Arc::clone(r.value())).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

//! Read-only export of governor state for dashboards and the CLI

use crate::allocation::BurstUtilization;
use crate::models::{AdjustmentRecord, ResourceKind, ResourceStatistics, ServiceTier};
use serde::{Deserialize, Serialize};

/// State of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub tier: ServiceTier,
    pub base_minimum: f64,
    pub current_guarantee: f64,
    pub max_burst: f64,
    pub guaranteed_in_use: f64,
    pub burst_held: f64,
    pub active_allocations: usize,
    /// Unix timestamp in milliseconds (0 if never adjusted)
    pub last_adjusted: i64,
    pub statistics: Option<ResourceStatistics>,
    /// Samples in the window, anomalous ones included
    pub samples: usize,
    pub anomalies_total: u64,
    pub history: Vec<AdjustmentRecord>,
}

impl ServiceSnapshot {
    /// Share of the burst ceiling in use, in [0, 1]
    pub fn burst_utilization(&self) -> f64 {
        if self.max_burst <= 0.0 {
            0.0
        } else {
            (self.burst_held / self.max_burst).clamp(0.0, 1.0)
        }
    }
}

/// State of the whole governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSnapshot {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub instance: String,
    pub resource: ResourceKind,
    pub total_capacity: f64,
    pub burst_pool: BurstUtilization,
    pub services: Vec<ServiceSnapshot>,
}

impl GovernorSnapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceSnapshot> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Sum of current guarantees
    pub fn total_guaranteed(&self) -> f64 {
        self.services.iter().map(|s| s.current_guarantee).sum()
    }
}

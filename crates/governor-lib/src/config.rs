//! Governor configuration model
//!
//! Every knob has a default so a config only needs the capacity and the
//! service list. Loading from files and the environment happens in the
//! binary.

use crate::error::{GovernorError, Result};
use crate::models::{ResourceKind, ServiceTier, TierPolicy};
use crate::quota::{DampeningConfig, TierPolicyTable, DEFAULT_MIN_SAMPLES};
use crate::stats::{AnomalyConfig, DEFAULT_MAX_SAMPLES, DEFAULT_TREND_SAMPLES};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A governed service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub tier: ServiceTier,
    /// Guarantee floor, reserved out of total capacity
    pub base_minimum: f64,
    /// File descriptor limit handed to the enforcer
    #[serde(default)]
    pub fd_limit: Option<u64>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, tier: ServiceTier, base_minimum: f64) -> Self {
        Self {
            name: name.into(),
            tier,
            base_minimum,
            fd_limit: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Name attached to structured log events
    pub instance: String,
    /// Resource dimension being budgeted
    pub resource: ResourceKind,
    pub total_capacity: f64,
    pub window_secs: u64,
    pub sample_interval_ms: u64,
    pub adjust_interval_ms: u64,
    /// Accepted samples required before a guarantee moves
    pub min_samples: usize,
    pub trend_samples: usize,
    pub max_samples: usize,
    /// Adjustment records kept per service
    pub history_limit: usize,
    /// How often waiting requests re-check without a wake-up
    pub overflow_recheck_ms: u64,
    pub dampening: DampeningConfig,
    pub anomaly: AnomalyConfig,
    /// Per-tier overrides of the built-in policies
    pub tiers: HashMap<ServiceTier, TierPolicy>,
    pub services: Vec<ServiceConfig>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            instance: "resource-governor".to_string(),
            resource: ResourceKind::Cpu,
            total_capacity: 100.0,
            window_secs: 3600,
            sample_interval_ms: 10_000,
            adjust_interval_ms: 60_000,
            min_samples: DEFAULT_MIN_SAMPLES,
            trend_samples: DEFAULT_TREND_SAMPLES,
            max_samples: DEFAULT_MAX_SAMPLES,
            history_limit: 100,
            overflow_recheck_ms: 250,
            dampening: DampeningConfig::default(),
            anomaly: AnomalyConfig::default(),
            tiers: HashMap::new(),
            services: Vec::new(),
        }
    }
}

impl GovernorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn adjust_interval(&self) -> Duration {
        Duration::from_millis(self.adjust_interval_ms)
    }

    pub fn overflow_recheck(&self) -> Duration {
        Duration::from_millis(self.overflow_recheck_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.dampening.cooldown_ms)
    }

    /// Sum of all base minimums
    pub fn reserved_capacity(&self) -> f64 {
        self.services.iter().map(|s| s.base_minimum).sum()
    }

    /// Policy table with overrides applied and every service assigned
    pub fn policy_table(&self) -> Result<TierPolicyTable> {
        let mut table = TierPolicyTable::new(self.tiers.clone())?;
        for service in &self.services {
            table.assign(service.name.clone(), service.tier);
        }
        Ok(table)
    }

    /// Check the configuration for inconsistencies
    pub fn validate(&self) -> Result<()> {
        if !self.total_capacity.is_finite() || self.total_capacity <= 0.0 {
            return invalid(format!(
                "total_capacity must be positive, got {}",
                self.total_capacity
            ));
        }
        if self.window_secs == 0 {
            return invalid("window_secs must be greater than zero");
        }
        if self.sample_interval_ms == 0 || self.adjust_interval_ms == 0 {
            return invalid("sampling and adjustment intervals must be greater than zero");
        }
        if self.overflow_recheck_ms == 0 {
            return invalid("overflow_recheck_ms must be greater than zero");
        }
        if self.history_limit == 0 {
            return invalid("history_limit must be greater than zero");
        }

        let dampening = &self.dampening;
        if !(dampening.max_change_rate > 0.0 && dampening.max_change_rate <= 1.0) {
            return invalid(format!(
                "dampening.max_change_rate must be within (0, 1], got {}",
                dampening.max_change_rate
            ));
        }
        if !(0.0..1.0).contains(&dampening.smoothing_factor) {
            return invalid(format!(
                "dampening.smoothing_factor must be within [0, 1), got {}",
                dampening.smoothing_factor
            ));
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return invalid("service names must not be empty");
            }
            if !names.insert(service.name.as_str()) {
                return invalid(format!("duplicate service name {}", service.name));
            }
            if !service.base_minimum.is_finite() || service.base_minimum < 0.0 {
                return invalid(format!(
                    "service {} has invalid base_minimum {}",
                    service.name, service.base_minimum
                ));
            }
        }

        let reserved = self.reserved_capacity();
        if reserved > self.total_capacity {
            return invalid(format!(
                "sum of base minimums ({}) exceeds total_capacity ({})",
                reserved, self.total_capacity
            ));
        }

        self.policy_table().map(|_| ())
    }
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(GovernorError::InvalidConfiguration(message.into()))
}

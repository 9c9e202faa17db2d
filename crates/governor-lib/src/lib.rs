//! Adaptive resource governor library
//!
//! This crate provides the core functionality for:
//! - Rolling usage statistics with anomaly filtering
//! - Tier-aware adaptive quotas with dampened adjustment
//! - Guaranteed, burst and preemptive admission over a shared burst pool
//! - Limit enforcement hooks
//! - Health checks and observability

pub mod allocation;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod health;
pub mod manager;
pub mod models;
pub mod observability;
pub mod quota;
pub mod registry;
pub mod sampling;
pub mod snapshot;
pub mod stats;

pub use allocation::BurstUtilization;
pub use config::{GovernorConfig, ServiceConfig};
pub use enforcer::{LoggingEnforcer, NoopEnforcer, ResourceEnforcer};
pub use error::{EnforcementError, GovernorError, InsufficientReason, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use manager::AdaptiveResourceManager;
pub use models::*;
pub use observability::{GovernorMetrics, StructuredLogger};
pub use sampling::{MetricsFeed, SampleSink, SamplingLoop};
pub use snapshot::{GovernorSnapshot, ServiceSnapshot};

//! Component health for liveness and readiness probes

use crate::models::unix_millis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still admitting and adjusting, but something is failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Health of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix timestamp in milliseconds of the last status change
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: unix_millis(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status over all components
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SAMPLER: &str = "sampler";
    pub const ADJUSTER: &str = "adjuster";
    pub const ENFORCER: &str = "enforcer";
    pub const BURST_POOL: &str = "burst_pool";

    pub const ALL: [&str; 4] = [SAMPLER, ADJUSTER, ENFORCER, BURST_POOL];
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    started: bool,
}

impl HealthState {
    fn overall(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Shared, cloneable view of governor component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy. Existing entries are left alone.
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .entry(name.to_string())
            .or_insert_with(|| ComponentHealth::new(ComponentStatus::Healthy, None));
    }

    /// Register every governor component
    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    /// Status of a single component, if registered
    pub async fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.state.read().await.components.get(name).map(|c| c.status)
    }

    /// Record a component's status. `updated_at` only moves when status or message changes.
    pub async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        match state.components.get_mut(name) {
            Some(current) if current.status == status && current.message == message => {}
            Some(current) => *current = ComponentHealth::new(status, message),
            None => {
                state
                    .components
                    .insert(name.to_string(), ComponentHealth::new(status, message));
            }
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Mark the governor started (ready to serve) or stopped
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.overall(),
            components: state.components.clone(),
        }
    }

    /// Ready once started, as long as no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.started {
            Some("Governor not started".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| format!("Component {} unhealthy", name))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

//! Enforcement seam
//!
//! The governor only computes limits. Applying them (cgroups, rlimits,
//! container runtimes) is the job of a [`ResourceEnforcer`].

use crate::error::EnforcementError;
use crate::models::ProcessLimits;
use async_trait::async_trait;
use tracing::info;

/// Applies computed limits to a running service
#[async_trait]
pub trait ResourceEnforcer: Send + Sync {
    async fn set_limits(&self, service: &str, limits: ProcessLimits) -> Result<(), EnforcementError>;
}

/// Accepts every update and does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnforcer;

#[async_trait]
impl ResourceEnforcer for NoopEnforcer {
    async fn set_limits(&self, _service: &str, _limits: ProcessLimits) -> Result<(), EnforcementError> {
        Ok(())
    }
}

/// Logs every update as a structured event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEnforcer;

#[async_trait]
impl ResourceEnforcer for LoggingEnforcer {
    async fn set_limits(&self, service: &str, limits: ProcessLimits) -> Result<(), EnforcementError> {
        info!(
            event = "limits_applied",
            service = %service,
            cpu = ?limits.cpu,
            memory = ?limits.memory,
            io = ?limits.io,
            fds = ?limits.fds,
            "Applying process limits"
        );
        Ok(())
    }
}

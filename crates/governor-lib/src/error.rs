//! Error types for the resource governor

use std::fmt;
use thiserror::Error;

/// Why an allocation could not be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientReason {
    /// Guarantee, burst pool and preemption were all exhausted
    Exhausted,
    /// The service's own burst ceiling would be exceeded
    BurstCeiling,
    /// The service recently released burst and may not burst again yet
    Cooldown,
    /// The caller's deadline elapsed while waiting for capacity
    DeadlineExceeded,
}

impl InsufficientReason {
    /// Stable label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            InsufficientReason::Exhausted => "exhausted",
            InsufficientReason::BurstCeiling => "burst_ceiling",
            InsufficientReason::Cooldown => "cooldown",
            InsufficientReason::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientReason::Exhausted => write!(f, "capacity exhausted"),
            InsufficientReason::BurstCeiling => write!(f, "burst ceiling reached"),
            InsufficientReason::Cooldown => write!(f, "burst cooldown active"),
            InsufficientReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Errors surfaced by the governor core
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("insufficient resources for {service}: requested {requested:.3} ({reason})")]
    InsufficientResource {
        service: String,
        requested: f64,
        reason: InsufficientReason,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown allocation {0} (already released or reclaimed)")]
    UnknownAllocation(u64),

    #[error(transparent)]
    Enforcement(#[from] EnforcementError),
}

impl GovernorError {
    pub fn insufficient(service: &str, requested: f64, reason: InsufficientReason) -> Self {
        GovernorError::InsufficientResource {
            service: service.to_string(),
            requested,
            reason,
        }
    }

    /// Returns the insufficiency reason, if this is an `InsufficientResource` error
    pub fn insufficient_reason(&self) -> Option<InsufficientReason> {
        match self {
            GovernorError::InsufficientResource { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Failure reported by an enforcement backend
#[derive(Debug, Clone, Error)]
#[error("enforcement failed for {service}: {message}")]
pub struct EnforcementError {
    pub service: String,
    pub message: String,
}

impl EnforcementError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = GovernorError> = std::result::Result<T, E>;

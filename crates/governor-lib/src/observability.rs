//! Observability infrastructure for the resource governor
//!
//! Provides:
//! - Prometheus metrics (guarantees, burst pool usage, admission outcomes, latencies)
//! - Structured logging of governor events with tracing

use crate::error::InsufficientReason;
use crate::models::{AdjustmentRecord, PreemptionNotice, ServiceTier};
use crate::stats::SampleAnomaly;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GovernorMetricsInner> = OnceLock::new();

struct GovernorMetricsInner {
    guarantee: GaugeVec,
    max_burst: GaugeVec,
    burst_held: GaugeVec,
    pool_capacity: Gauge,
    pool_allocated: Gauge,
    services_registered: IntGauge,
    allocations: IntCounterVec,
    denials: IntCounterVec,
    preemptions: IntCounter,
    anomalies_filtered: IntCounterVec,
    adjustments: IntCounter,
    enforcement_errors: IntCounter,
    adjustment_duration_seconds: Histogram,
    allocation_latency_seconds: Histogram,
}

impl GovernorMetricsInner {
    fn new() -> Self {
        Self {
            guarantee: register_gauge_vec!(
                "resource_governor_guarantee",
                "Current guarantee per service",
                &["service", "tier"]
            )
            .expect("Failed to register guarantee"),

            max_burst: register_gauge_vec!(
                "resource_governor_max_burst",
                "Burst ceiling per service",
                &["service", "tier"]
            )
            .expect("Failed to register max_burst"),

            burst_held: register_gauge_vec!(
                "resource_governor_burst_held",
                "Burst capacity currently held per service",
                &["service"]
            )
            .expect("Failed to register burst_held"),

            pool_capacity: register_gauge!(
                "resource_governor_burst_pool_capacity",
                "Total capacity of the shared burst pool"
            )
            .expect("Failed to register pool_capacity"),

            pool_allocated: register_gauge!(
                "resource_governor_burst_pool_allocated",
                "Burst pool capacity currently granted"
            )
            .expect("Failed to register pool_allocated"),

            services_registered: register_int_gauge!(
                "resource_governor_services_registered",
                "Number of governed services"
            )
            .expect("Failed to register services_registered"),

            allocations: register_int_counter_vec!(
                "resource_governor_allocations_total",
                "Granted allocations by admission phase",
                &["phase"]
            )
            .expect("Failed to register allocations"),

            denials: register_int_counter_vec!(
                "resource_governor_allocation_denials_total",
                "Denied allocations by reason",
                &["reason"]
            )
            .expect("Failed to register denials"),

            preemptions: register_int_counter!(
                "resource_governor_preemptions_total",
                "Burst grants reclaimed for higher tiers"
            )
            .expect("Failed to register preemptions"),

            anomalies_filtered: register_int_counter_vec!(
                "resource_governor_anomalies_filtered_total",
                "Samples rejected by the anomaly detector",
                &["service"]
            )
            .expect("Failed to register anomalies_filtered"),

            adjustments: register_int_counter!(
                "resource_governor_quota_adjustments_total",
                "Published guarantee changes"
            )
            .expect("Failed to register adjustments"),

            enforcement_errors: register_int_counter!(
                "resource_governor_enforcement_errors_total",
                "Failed set_limits calls"
            )
            .expect("Failed to register enforcement_errors"),

            adjustment_duration_seconds: register_histogram!(
                "resource_governor_adjustment_cycle_seconds",
                "Time spent in one adjustment cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register adjustment_duration_seconds"),

            allocation_latency_seconds: register_histogram!(
                "resource_governor_allocation_latency_seconds",
                "Time to admit or deny an allocation, waiting included",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register allocation_latency_seconds"),
        }
    }
}

/// Governor metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct GovernorMetrics {
    _private: (),
}

impl Default for GovernorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GovernorMetricsInner {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new)
    }

    pub fn set_quota(&self, service: &str, tier: ServiceTier, guarantee: f64, max_burst: f64) {
        let tier = tier.to_string();
        let inner = self.inner();
        inner
            .guarantee
            .with_label_values(&[service, tier.as_str()])
            .set(guarantee);
        inner
            .max_burst
            .with_label_values(&[service, tier.as_str()])
            .set(max_burst);
    }

    pub fn set_burst_held(&self, service: &str, held: f64) {
        self.inner().burst_held.with_label_values(&[service]).set(held);
    }

    pub fn set_pool(&self, capacity: f64, allocated: f64) {
        self.inner().pool_capacity.set(capacity);
        self.inner().pool_allocated.set(allocated);
    }

    pub fn set_services_registered(&self, count: i64) {
        self.inner().services_registered.set(count);
    }

    /// Drop per-service series after deregistration
    pub fn remove_service(&self, service: &str, tier: ServiceTier) {
        let tier = tier.to_string();
        let inner = self.inner();
        let _ = inner.guarantee.remove_label_values(&[service, tier.as_str()]);
        let _ = inner.max_burst.remove_label_values(&[service, tier.as_str()]);
        let _ = inner.burst_held.remove_label_values(&[service]);
    }

    pub fn inc_allocation(&self, phase: &str) {
        self.inner().allocations.with_label_values(&[phase]).inc();
    }

    pub fn inc_denial(&self, reason: &str) {
        self.inner().denials.with_label_values(&[reason]).inc();
    }

    pub fn inc_preemptions(&self, count: u64) {
        self.inner().preemptions.inc_by(count);
    }

    pub fn inc_anomalies_filtered(&self, service: &str) {
        self.inner()
            .anomalies_filtered
            .with_label_values(&[service])
            .inc();
    }

    pub fn inc_adjustments(&self) {
        self.inner().adjustments.inc();
    }

    pub fn inc_enforcement_errors(&self) {
        self.inner().enforcement_errors.inc();
    }

    pub fn observe_adjustment_duration(&self, duration_secs: f64) {
        self.inner().adjustment_duration_seconds.observe(duration_secs);
    }

    pub fn observe_allocation_latency(&self, duration_secs: f64) {
        self.inner().allocation_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for governor events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a published guarantee change
    pub fn log_quota_adjusted(&self, service: &str, tier: ServiceTier, record: &AdjustmentRecord) {
        info!(
            event = "quota_adjusted",
            instance = %self.instance,
            service = %service,
            tier = %tier,
            old_guarantee = record.old_guarantee,
            new_guarantee = record.new_guarantee,
            reason = %record.reason,
            "Guarantee adjusted"
        );
    }

    /// Log a burst reclaim
    pub fn log_preemption(&self, notice: &PreemptionNotice) {
        warn!(
            event = "burst_preempted",
            instance = %self.instance,
            service = %notice.service,
            allocation_id = notice.allocation_id,
            reclaimed = notice.reclaimed,
            remaining_burst = notice.remaining_burst,
            preempted_by = %notice.preempted_by,
            "Burst capacity reclaimed"
        );
    }

    /// Log a denied allocation
    pub fn log_allocation_denied(&self, service: &str, requested: f64, reason: InsufficientReason) {
        info!(
            event = "allocation_denied",
            instance = %self.instance,
            service = %service,
            requested = requested,
            reason = %reason,
            "Allocation denied"
        );
    }

    /// Log a sample dropped by the anomaly detector
    pub fn log_anomaly_filtered(&self, service: &str, anomaly: &SampleAnomaly) {
        info!(
            event = "anomaly_filtered",
            instance = %self.instance,
            service = %service,
            value = anomaly.value,
            method = ?anomaly.method,
            score = anomaly.score,
            lower_bound = anomaly.lower_bound,
            upper_bound = anomaly.upper_bound,
            "Anomalous sample excluded from statistics"
        );
    }

    pub fn log_level_shift(&self, service: &str, reaccepted: usize) {
        info!(
            event = "level_shift",
            instance = %self.instance,
            service = %service,
            reaccepted = reaccepted,
            "Sustained usage change accepted into statistics"
        );
    }

    /// Log a failed enforcement call
    pub fn log_enforcement_failed(&self, service: &str, error: &str) {
        warn!(
            event = "enforcement_failed",
            instance = %self.instance,
            service = %service,
            error = %error,
            "Failed to apply process limits"
        );
    }

    pub fn log_startup(&self, version: &str, services: usize, pool_capacity: f64) {
        info!(
            event = "governor_started",
            instance = %self.instance,
            version = %version,
            services = services,
            pool_capacity = pool_capacity,
            "Resource governor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "governor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Resource governor shutting down"
        );
    }
}

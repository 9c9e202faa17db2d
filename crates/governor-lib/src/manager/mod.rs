//! The adaptive resource manager
//!
//! Owns every piece of governor state (service registry, burst pool, tier
//! table) and the background tasks that drive it: one sampling loop per
//! service and a single adjustment loop. Created with [`AdaptiveResourceManager::new`],
//! driven with [`start`](AdaptiveResourceManager::start) and stopped with
//! [`shutdown`](AdaptiveResourceManager::shutdown).

mod adjuster;

#[cfg(test)]
mod tests;

use crate::allocation::{AllocationCoordinator, BurstPool};
use crate::config::{GovernorConfig, ServiceConfig};
use crate::enforcer::ResourceEnforcer;
use crate::error::{GovernorError, Result};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{
    unix_millis, AdaptiveQuota, AdmissionPhase, Allocation, PreemptionNotice, ProcessLimits,
    ResourceRequest, ResourceSample,
};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::quota::{AdaptiveQuotaCalculator, AdjustmentDampener, TierPolicyTable};
use crate::registry::{ServiceEntry, ServiceRegistry};
use crate::sampling::{MetricsFeed, SampleSink, SamplingLoop};
use crate::snapshot::{GovernorSnapshot, ServiceSnapshot};
use crate::stats::{AnomalyDetector, RecordOutcome, RollingMetrics};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffered preemption notices per subscriber
const PREEMPTION_CHANNEL_CAPACITY: usize = 256;

/// How far ahead of the local clock a sample timestamp may be
pub const MAX_SAMPLE_CLOCK_SKEW_MS: i64 = 60_000;

/// Adaptive resource management core
pub struct AdaptiveResourceManager {
    config: GovernorConfig,
    registry: Arc<ServiceRegistry>,
    pool: Arc<BurstPool>,
    policies: Arc<RwLock<TierPolicyTable>>,
    coordinator: AllocationCoordinator,
    calculator: AdaptiveQuotaCalculator,
    detector: AnomalyDetector,
    enforcer: Arc<dyn ResourceEnforcer>,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    preemptions: broadcast::Sender<PreemptionNotice>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl AdaptiveResourceManager {
    /// Build a manager from a validated configuration.
    ///
    /// Every configured service is registered and the burst pool is sized to
    /// `total_capacity` minus the sum of base minimums.
    pub fn new(config: GovernorConfig, enforcer: Arc<dyn ResourceEnforcer>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ServiceRegistry::new());
        let pool = Arc::new(BurstPool::new(config.total_capacity, config.cooldown()));
        let policies = Arc::new(RwLock::new(config.policy_table()?));
        let coordinator = AllocationCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            Arc::clone(&policies),
            config.overflow_recheck(),
        );
        let calculator = AdaptiveQuotaCalculator::new(
            AdjustmentDampener::from_config(&config.dampening),
            config.min_samples,
        );
        let (preemptions, _) = broadcast::channel(PREEMPTION_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        let manager = Self {
            detector: AnomalyDetector::new(config.anomaly.clone()),
            logger: StructuredLogger::new(config.instance.clone()),
            config,
            registry,
            pool,
            policies,
            coordinator,
            calculator,
            enforcer,
            metrics: GovernorMetrics::new(),
            health: HealthRegistry::new(),
            preemptions,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        };

        for service in manager.config.services.clone() {
            manager.insert_service(&service)?;
        }
        manager.publish_pool_metrics();
        Ok(manager)
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn pool(&self) -> &BurstPool {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Push initial limits, start the adjustment loop and mark the governor ready
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.health.register_all().await;

        for entry in self.registry.list() {
            self.enforce(&entry).await;
        }

        let adjuster = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks
            .lock()
            .push(tokio::spawn(adjuster.run_adjuster(shutdown)));

        self.health.set_ready(true).await;
        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.registry.len(),
            self.pool.utilization().total_capacity,
        );
    }

    /// Signal every background task and wait for them to finish
    pub async fn shutdown(&self) {
        self.logger.log_shutdown("shutdown requested");
        self.health.set_ready(false).await;

        // No receivers simply means no task was started
        let _ = self.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.started.store(false, Ordering::SeqCst);
        info!("Resource governor stopped");
    }

    /// Spawn the sampling loop for a registered service
    pub fn spawn_sampler(self: &Arc<Self>, service: &str, feed: Arc<dyn MetricsFeed>) -> Result<()> {
        if !self.registry.contains(service) {
            return Err(GovernorError::UnknownService(service.to_string()));
        }

        let sink: Arc<dyn SampleSink> = Arc::clone(self) as Arc<dyn SampleSink>;
        let sampling = SamplingLoop::new(service, feed, sink, self.config.sample_interval())
            .with_health(self.health.clone());
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.lock().push(tokio::spawn(sampling.run(shutdown)));
        Ok(())
    }

    /// Add a service at runtime, carving its base minimum out of the burst pool
    pub async fn register_service(&self, service: ServiceConfig) -> Result<()> {
        if service.name.trim().is_empty() {
            return Err(GovernorError::InvalidConfiguration(
                "service names must not be empty".to_string(),
            ));
        }
        if !service.base_minimum.is_finite() || service.base_minimum < 0.0 {
            return Err(GovernorError::InvalidConfiguration(format!(
                "service {} has invalid base_minimum {}",
                service.name, service.base_minimum
            )));
        }

        let entry = self.insert_service(&service)?;
        self.publish_pool_metrics();
        if self.is_running() {
            self.enforce(&entry).await;
        }
        info!(service = %service.name, tier = %service.tier, "Service registered");
        Ok(())
    }

    /// Remove a service, returning its capacity to the burst pool
    pub async fn deregister_service(&self, service: &str) -> Result<()> {
        let entry = self.coordinator.deregister(service)?;
        self.metrics.remove_service(&entry.name, entry.tier);
        self.metrics.set_services_registered(self.registry.len() as i64);
        self.publish_pool_metrics();
        info!(service = %service, "Service deregistered");
        Ok(())
    }

    /// Record a sample for a service.
    ///
    /// Samples stamped more than [`MAX_SAMPLE_CLOCK_SKEW_MS`] in the future are
    /// rejected, since window expiry follows sample time.
    pub fn report(&self, service: &str, sample: ResourceSample) -> Result<()> {
        let entry = self
            .registry
            .get(service)
            .ok_or_else(|| GovernorError::UnknownService(service.to_string()))?;

        let latest = unix_millis() + MAX_SAMPLE_CLOCK_SKEW_MS;
        if sample.timestamp > latest {
            return Err(GovernorError::InvalidRequest(format!(
                "sample timestamp {} is ahead of the governor clock",
                sample.timestamp
            )));
        }

        let outcome = entry.metrics.lock().record(sample);
        match outcome {
            RecordOutcome::Accepted => {}
            RecordOutcome::Anomalous(anomaly) => {
                self.metrics.inc_anomalies_filtered(service);
                self.logger.log_anomaly_filtered(service, &anomaly);
            }
            RecordOutcome::LevelShift { reaccepted } => {
                self.logger.log_level_shift(service, reaccepted);
            }
        }
        Ok(())
    }

    /// Admit a request through the guaranteed, burst, preemption and overflow phases
    pub async fn allocate(&self, service: &str, request: ResourceRequest) -> Result<Allocation> {
        let started = Instant::now();
        let result = self.coordinator.allocate(service, &request).await;
        self.metrics
            .observe_allocation_latency(started.elapsed().as_secs_f64());

        let admission = match result {
            Ok(admission) => admission,
            Err(e) => {
                if let Some(reason) = e.insufficient_reason() {
                    self.metrics.inc_denial(reason.as_str());
                    self.logger
                        .log_allocation_denied(service, request.amount, reason);
                }
                return Err(e);
            }
        };

        let allocation = admission.allocation;
        self.metrics.inc_allocation(allocation.phase.as_str());

        // Limits only move when burst moves
        if allocation.phase != AdmissionPhase::Guaranteed {
            let mut touched = BTreeSet::new();
            touched.insert(allocation.service.clone());

            if !admission.preempted.is_empty() {
                self.metrics.inc_preemptions(admission.preempted.len() as u64);
            }
            for notice in admission.preempted {
                self.logger.log_preemption(&notice);
                touched.insert(notice.service.clone());
                // Nobody listening is fine; holders can poll `allocation`
                let _ = self.preemptions.send(notice);
            }

            for name in touched {
                if let Some(entry) = self.registry.get(&name) {
                    self.enforce(&entry).await;
                }
            }
            self.publish_pool_metrics();
        }

        debug!(
            service = %allocation.service,
            allocation_id = allocation.id,
            phase = allocation.phase.as_str(),
            guaranteed = allocation.guaranteed,
            burst = allocation.burst,
            "Allocation granted"
        );
        Ok(allocation)
    }

    /// Release an allocation. A second release fails with `UnknownAllocation`.
    pub async fn release(&self, allocation: &Allocation) -> Result<()> {
        let released = self.coordinator.release(allocation)?;

        if allocation.phase != AdmissionPhase::Guaranteed {
            if let Some(entry) = self.registry.get(&released.service) {
                self.enforce(&entry).await;
            }
            self.publish_pool_metrics();
        }

        debug!(
            service = %released.service,
            allocation_id = released.allocation_id,
            guaranteed = released.guaranteed,
            burst = released.burst,
            "Allocation released"
        );
        Ok(())
    }

    /// Current view of a live allocation. Burst shrinks after preemption.
    pub fn allocation(&self, service: &str, allocation_id: u64) -> Option<Allocation> {
        self.coordinator.allocation(service, allocation_id)
    }

    /// Notices for holders whose burst was reclaimed
    pub fn subscribe_preemptions(&self) -> broadcast::Receiver<PreemptionNotice> {
        self.preemptions.subscribe()
    }

    /// Snapshot of every service and the burst pool
    pub fn snapshot(&self) -> GovernorSnapshot {
        let now_ms = unix_millis();
        let services = self
            .registry
            .list()
            .iter()
            .map(|entry| self.service_snapshot_of(entry, now_ms))
            .collect();

        GovernorSnapshot {
            timestamp: now_ms,
            instance: self.config.instance.clone(),
            resource: self.config.resource.clone(),
            total_capacity: self.config.total_capacity,
            burst_pool: self.pool.utilization(),
            services,
        }
    }

    pub fn service_snapshot(&self, service: &str) -> Option<ServiceSnapshot> {
        self.registry
            .get(service)
            .map(|entry| self.service_snapshot_of(&entry, unix_millis()))
    }

    fn service_snapshot_of(&self, entry: &ServiceEntry, now_ms: i64) -> ServiceSnapshot {
        let (statistics, samples, anomalies_total) = {
            let mut metrics = entry.metrics.lock();
            let statistics = metrics.statistics(now_ms);
            (statistics, metrics.len(), metrics.anomalies_total())
        };

        let state = entry.state.lock();
        let burst_held = self.pool.lock().held_by(&entry.name);
        let quota = &state.quota;

        ServiceSnapshot {
            name: entry.name.clone(),
            tier: entry.tier,
            base_minimum: quota.base_minimum,
            current_guarantee: quota.current_guarantee,
            max_burst: quota.max_burst,
            guaranteed_in_use: state.guaranteed_in_use,
            burst_held,
            active_allocations: state.allocations.len(),
            last_adjusted: quota.last_adjusted,
            statistics,
            samples,
            anomalies_total,
            history: quota.adjustment_log.iter().cloned().collect(),
        }
    }

    fn insert_service(&self, service: &ServiceConfig) -> Result<Arc<ServiceEntry>> {
        let policy = self.policies.read().policy(service.tier).clone();
        let quota = AdaptiveQuota::new(
            service.tier,
            service.base_minimum,
            policy.burst_ratio,
            self.config.history_limit,
        );
        let metrics = RollingMetrics::new(
            self.config.resource.clone(),
            self.config.window(),
            self.detector.clone(),
        )
        .with_trend_samples(self.config.trend_samples)
        .with_max_samples(self.config.max_samples);

        let (guarantee, max_burst) = (quota.current_guarantee, quota.max_burst);
        self.coordinator.register(ServiceEntry::new(
            service.name.clone(),
            quota,
            service.fd_limit,
            metrics,
        ))?;
        self.metrics
            .set_quota(&service.name, service.tier, guarantee, max_burst);
        self.metrics.set_services_registered(self.registry.len() as i64);

        self.registry
            .get(&service.name)
            .ok_or_else(|| GovernorError::UnknownService(service.name.clone()))
    }

    /// Push the service's current ceiling (guarantee + burst held) to the enforcer.
    ///
    /// Runs outside every lock; failures are logged and counted, never rolled back.
    async fn enforce(&self, entry: &ServiceEntry) {
        let (guarantee, burst_held) = {
            let state = entry.state.lock();
            let held = self.pool.lock().held_by(&entry.name);
            (state.quota.current_guarantee, held)
        };
        self.metrics.set_burst_held(&entry.name, burst_held);

        let limits = ProcessLimits::for_resource(
            &self.config.resource,
            guarantee + burst_held,
            entry.fd_limit,
        );

        match self.enforcer.set_limits(&entry.name, limits).await {
            Ok(()) => {
                if matches!(
                    self.health.status_of(components::ENFORCER).await,
                    Some(status) if status != ComponentStatus::Healthy
                ) {
                    self.health.set_healthy(components::ENFORCER).await;
                }
            }
            Err(e) => {
                self.metrics.inc_enforcement_errors();
                self.logger.log_enforcement_failed(&entry.name, &e.to_string());
                self.health
                    .set_degraded(components::ENFORCER, e.to_string())
                    .await;
            }
        }
    }

    /// Check pool accounting and report it as the burst pool's health
    async fn audit_pool(&self) {
        let audit = self.pool.lock().audit();
        match audit {
            Ok(()) => {
                if matches!(
                    self.health.status_of(components::BURST_POOL).await,
                    Some(status) if status != ComponentStatus::Healthy
                ) {
                    self.health.set_healthy(components::BURST_POOL).await;
                }
            }
            Err(drift) => {
                error!(error = %drift, "Burst pool accounting mismatch");
                self.health
                    .set_unhealthy(components::BURST_POOL, drift)
                    .await;
            }
        }
    }

    fn publish_pool_metrics(&self) {
        let usage = self.pool.utilization();
        self.metrics.set_pool(usage.total_capacity, usage.allocated);
    }
}

impl SampleSink for AdaptiveResourceManager {
    fn report(&self, service: &str, sample: ResourceSample) -> Result<()> {
        AdaptiveResourceManager::report(self, service, sample)
    }
}

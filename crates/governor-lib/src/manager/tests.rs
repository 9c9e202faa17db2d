//! Scenario tests for the adaptive resource manager

use super::*;
use crate::allocation::{BurstGrant, BurstPool};
use crate::enforcer::NoopEnforcer;
use crate::error::{EnforcementError, InsufficientReason};
use crate::models::{ServiceTier, TierPolicy};
use crate::quota::DampeningConfig;
use async_trait::async_trait;
use proptest::prelude::*;
use std::time::Duration;

/// Records every set_limits call
#[derive(Default)]
struct RecordingEnforcer {
    calls: Mutex<Vec<(String, ProcessLimits)>>,
    fail: bool,
}

impl RecordingEnforcer {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn calls_for(&self, service: &str) -> Vec<ProcessLimits> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, limits)| limits.clone())
            .collect()
    }
}

#[async_trait]
impl ResourceEnforcer for RecordingEnforcer {
    async fn set_limits(&self, service: &str, limits: ProcessLimits) -> std::result::Result<(), EnforcementError> {
        self.calls.lock().push((service.to_string(), limits));
        if self.fail {
            return Err(EnforcementError::new(service, "cgroup write refused"));
        }
        Ok(())
    }
}

struct ConstantFeed(f64);

#[async_trait]
impl MetricsFeed for ConstantFeed {
    async fn sample(&self, _service: &str) -> anyhow::Result<ResourceSample> {
        Ok(ResourceSample::cpu(unix_millis(), self.0))
    }
}

fn config(total_capacity: f64, services: Vec<ServiceConfig>) -> GovernorConfig {
    GovernorConfig {
        instance: "test".to_string(),
        total_capacity,
        services,
        min_samples: 10,
        dampening: DampeningConfig {
            max_change_rate: 1.0,
            smoothing_factor: 0.0,
            cooldown_ms: 0,
        },
        ..Default::default()
    }
}

fn manager(config: GovernorConfig) -> Arc<AdaptiveResourceManager> {
    Arc::new(AdaptiveResourceManager::new(config, Arc::new(NoopEnforcer)).unwrap())
}

/// Report `count` samples spread over the last `count` seconds
fn feed_samples(manager: &AdaptiveResourceManager, service: &str, value: f64, count: i64) {
    let now = unix_millis();
    for i in 0..count {
        manager
            .report(service, ResourceSample::cpu(now - (count - i) * 1_000, value))
            .unwrap();
    }
}

/// Report `count` samples one second apart starting at `start_ms`
fn feed_from(manager: &AdaptiveResourceManager, service: &str, value: f64, start_ms: i64, count: i64) {
    for i in 0..count {
        manager
            .report(service, ResourceSample::cpu(start_ms + i * 1_000, value))
            .unwrap();
    }
}

/// BestEffort service with base 50 on a one-minute window, raised to a guarantee of 100
async fn raised_best_effort(
    enforcer: Arc<RecordingEnforcer>,
) -> (Arc<AdaptiveResourceManager>, i64) {
    let mut cfg = config(
        1_000.0,
        vec![ServiceConfig::new("batch", ServiceTier::BestEffort, 50.0)],
    );
    cfg.window_secs = 60;
    let manager = Arc::new(AdaptiveResourceManager::new(cfg, enforcer).unwrap());

    let now = unix_millis();
    feed_from(&manager, "batch", 100.0, now - 59_000, 30);
    let changes = manager.adjust_once().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].1.new_guarantee, 100.0);
    (manager, now)
}

#[tokio::test]
async fn test_standard_service_guarantee_tracks_average_with_margin() {
    let manager = manager(config(
        1_000.0,
        vec![ServiceConfig::new("web", ServiceTier::Standard, 100.0)],
    ));

    feed_samples(&manager, "web", 100.0, 30);
    let changes = manager.adjust_once().await;

    assert_eq!(changes.len(), 1);
    let (service, record) = &changes[0];
    assert_eq!(service, "web");
    assert!((record.new_guarantee - 120.0).abs() < 1e-6);
    assert_eq!(record.reason, "average increase");

    let snapshot = manager.service_snapshot("web").unwrap();
    assert!((snapshot.current_guarantee - 120.0).abs() < 1e-6);
    assert!((snapshot.max_burst - 180.0).abs() < 1e-6);
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.statistics.map(|s| s.sample_count), Some(30));
}

#[tokio::test]
async fn test_insufficient_samples_keep_guarantee() {
    let manager = manager(config(
        1_000.0,
        vec![ServiceConfig::new("web", ServiceTier::Standard, 100.0)],
    ));

    feed_samples(&manager, "web", 500.0, 5);
    assert!(manager.adjust_once().await.is_empty());
    assert_eq!(manager.service_snapshot("web").unwrap().current_guarantee, 100.0);
}

#[tokio::test]
async fn test_guarantee_never_drops_below_base_minimum() {
    let manager = manager(config(
        1_000.0,
        vec![ServiceConfig::new("web", ServiceTier::Standard, 100.0)],
    ));

    feed_samples(&manager, "web", 1.0, 30);
    manager.adjust_once().await;
    assert_eq!(manager.service_snapshot("web").unwrap().current_guarantee, 100.0);
}

#[tokio::test]
async fn test_oldest_best_effort_burst_is_reclaimed_for_critical() {
    // Burst pool: 1000 - (200 + 100 + 100 + 100) = 500
    let manager = manager(config(
        1_000.0,
        vec![
            ServiceConfig::new("ledger", ServiceTier::Core, 200.0),
            ServiceConfig::new("batch-a", ServiceTier::BestEffort, 100.0),
            ServiceConfig::new("batch-b", ServiceTier::BestEffort, 100.0),
            ServiceConfig::new("payments", ServiceTier::Critical, 100.0),
        ],
    ));
    assert_eq!(manager.pool().utilization().total_capacity, 500.0);
    let mut notices = manager.subscribe_preemptions();

    // Core is not preemptible: it pins 250 of burst
    manager.allocate("ledger", ResourceRequest::fail_fast(200.0)).await.unwrap();
    manager.allocate("ledger", ResourceRequest::fail_fast(250.0)).await.unwrap();

    // Each BestEffort service holds a 100-unit burst; batch-a's is older
    manager.allocate("batch-a", ResourceRequest::fail_fast(100.0)).await.unwrap();
    let victim = manager
        .allocate("batch-a", ResourceRequest::fail_fast(100.0))
        .await
        .unwrap();
    manager.allocate("batch-b", ResourceRequest::fail_fast(100.0)).await.unwrap();
    let survivor = manager
        .allocate("batch-b", ResourceRequest::fail_fast(100.0))
        .await
        .unwrap();
    assert_eq!(manager.pool().utilization().available, 50.0);

    // Critical exhausts its guarantee, then asks for 150 of burst
    manager.allocate("payments", ResourceRequest::fail_fast(100.0)).await.unwrap();
    let allocation = manager
        .allocate("payments", ResourceRequest::fail_fast(150.0))
        .await
        .unwrap();

    assert_eq!(allocation.phase, AdmissionPhase::Preemption);
    assert_eq!(allocation.burst, 150.0);
    assert_eq!(manager.pool().utilization().available, 0.0);

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.service, "batch-a");
    assert_eq!(notice.allocation_id, victim.id);
    assert_eq!(notice.reclaimed, 100.0);
    assert_eq!(notice.preempted_by, "payments");
    assert!(notices.try_recv().is_err());

    assert_eq!(manager.allocation("batch-a", victim.id).unwrap().burst, 0.0);
    assert_eq!(manager.allocation("batch-b", survivor.id).unwrap().burst, 100.0);
}

#[tokio::test]
async fn test_guaranteed_allocation_never_takes_pool_lock() {
    let manager = manager(config(
        500.0,
        vec![ServiceConfig::new("api", ServiceTier::Critical, 100.0)],
    ));

    let before = manager.pool().lock_acquisitions();
    let first = manager.allocate("api", ResourceRequest::fail_fast(40.0)).await.unwrap();
    let second = manager.allocate("api", ResourceRequest::fail_fast(60.0)).await.unwrap();
    manager.release(&first).await.unwrap();
    manager.release(&second).await.unwrap();
    let after = manager.pool().lock_acquisitions();

    assert_eq!(first.phase, AdmissionPhase::Guaranteed);
    assert_eq!(second.phase, AdmissionPhase::Guaranteed);
    assert_eq!(before, after);

    // Crossing into burst does take it
    manager.allocate("api", ResourceRequest::fail_fast(101.0)).await.unwrap();
    assert!(manager.pool().lock_acquisitions() > after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_never_overcommit() {
    let services: Vec<ServiceConfig> = (0..10)
        .map(|i| {
            let tier = ServiceTier::ALL[i % ServiceTier::ALL.len()];
            ServiceConfig::new(format!("svc-{}", i), tier, 20.0)
        })
        .collect();
    // Pool: 400 - 10 * 20 = 200
    let manager = manager(config(400.0, services));

    let mut handles = Vec::new();
    for i in 0..100 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let service = format!("svc-{}", i % 10);
            manager
                .allocate(&service, ResourceRequest::fail_fast(15.0 + (i % 7) as f64 * 5.0))
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            granted += 1;
        }
    }
    assert!(granted > 0);

    let usage = manager.pool().utilization();
    assert!(usage.allocated <= usage.total_capacity + 1e-9);
    let held: f64 = usage.holders.values().sum();
    assert!((held - usage.allocated).abs() < 1e-6);

    for service in manager.snapshot().services {
        assert!(service.burst_held <= service.max_burst + 1e-9);
        assert!(service.guaranteed_in_use <= service.current_guarantee + 1e-9);
    }
}

#[tokio::test]
async fn test_double_release_does_not_double_credit() {
    let manager = manager(config(
        200.0,
        vec![ServiceConfig::new("api", ServiceTier::Core, 100.0)],
    ));

    let allocation = manager.allocate("api", ResourceRequest::fail_fast(130.0)).await.unwrap();
    assert_eq!(manager.pool().utilization().allocated, 30.0);

    manager.release(&allocation).await.unwrap();
    let err = manager.release(&allocation).await.unwrap_err();
    assert!(matches!(err, GovernorError::UnknownAllocation(_)));

    let usage = manager.pool().utilization();
    assert_eq!(usage.allocated, 0.0);
    assert_eq!(usage.total_capacity, 100.0);
    assert_eq!(manager.service_snapshot("api").unwrap().guaranteed_in_use, 0.0);
}

#[tokio::test]
async fn test_burst_limits_pushed_to_enforcer() {
    let enforcer = Arc::new(RecordingEnforcer::default());
    let cfg = config(
        200.0,
        vec![ServiceConfig {
            fd_limit: Some(1024),
            ..ServiceConfig::new("api", ServiceTier::Core, 100.0)
        }],
    );
    let manager = Arc::new(AdaptiveResourceManager::new(cfg, enforcer.clone()).unwrap());

    manager.start().await;
    assert_eq!(enforcer.calls_for("api").last().and_then(|l| l.cpu), Some(100.0));

    // Guaranteed allocations leave limits untouched
    let calls = enforcer.calls_for("api").len();
    let small = manager.allocate("api", ResourceRequest::fail_fast(10.0)).await.unwrap();
    assert_eq!(enforcer.calls_for("api").len(), calls);

    let burst = manager.allocate("api", ResourceRequest::fail_fast(120.0)).await.unwrap();
    let limits = enforcer.calls_for("api").last().cloned().unwrap();
    assert_eq!(limits.cpu, Some(130.0));
    assert_eq!(limits.fds, Some(1024));

    manager.release(&burst).await.unwrap();
    assert_eq!(enforcer.calls_for("api").last().and_then(|l| l.cpu), Some(100.0));

    manager.release(&small).await.unwrap();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_enforcement_failure_degrades_health_without_rollback() {
    let enforcer = Arc::new(RecordingEnforcer::failing());
    let manager = Arc::new(
        AdaptiveResourceManager::new(
            config(200.0, vec![ServiceConfig::new("api", ServiceTier::Core, 100.0)]),
            enforcer,
        )
        .unwrap(),
    );
    manager.health().register_all().await;

    let allocation = manager.allocate("api", ResourceRequest::fail_fast(120.0)).await.unwrap();
    assert_eq!(allocation.burst, 20.0);
    assert_eq!(manager.pool().utilization().allocated, 20.0);
    assert_eq!(
        manager.health().status_of(components::ENFORCER).await,
        Some(ComponentStatus::Degraded)
    );
}

#[tokio::test]
async fn test_unknown_service_errors() {
    let manager = manager(config(100.0, vec![]));

    assert!(matches!(
        manager.report("ghost", ResourceSample::cpu(0, 1.0)),
        Err(GovernorError::UnknownService(_))
    ));
    assert!(matches!(
        manager.allocate("ghost", ResourceRequest::fail_fast(1.0)).await,
        Err(GovernorError::UnknownService(_))
    ));
    assert!(manager.service_snapshot("ghost").is_none());
}

#[tokio::test]
async fn test_runtime_registration_and_deregistration() {
    let manager = manager(config(
        300.0,
        vec![ServiceConfig::new("api", ServiceTier::Core, 100.0)],
    ));
    assert_eq!(manager.pool().utilization().total_capacity, 200.0);

    manager
        .register_service(ServiceConfig::new("jobs", ServiceTier::Standard, 50.0))
        .await
        .unwrap();
    assert_eq!(manager.pool().utilization().total_capacity, 150.0);

    // Not enough free pool capacity to carve out another base minimum
    let err = manager
        .register_service(ServiceConfig::new("huge", ServiceTier::Standard, 500.0))
        .await
        .unwrap_err();
    assert_eq!(err.insufficient_reason(), Some(InsufficientReason::Exhausted));

    manager.allocate("jobs", ResourceRequest::fail_fast(70.0)).await.unwrap();
    assert_eq!(manager.pool().utilization().allocated, 20.0);

    manager.deregister_service("jobs").await.unwrap();
    let usage = manager.pool().utilization();
    assert_eq!(usage.total_capacity, 200.0);
    assert_eq!(usage.allocated, 0.0);
    assert!(manager.snapshot().service("jobs").is_none());
}

#[tokio::test]
async fn test_waiting_request_admitted_when_capacity_frees() {
    // Burst pool: 160 - (100 + 10) = 50
    let manager = manager(config(
        160.0,
        vec![
            ServiceConfig::new("api", ServiceTier::Standard, 100.0),
            ServiceConfig::new("jobs", ServiceTier::Standard, 10.0),
        ],
    ));

    let held = manager.allocate("api", ResourceRequest::fail_fast(150.0)).await.unwrap();
    assert_eq!(held.burst, 50.0);
    assert!(manager
        .allocate("jobs", ResourceRequest::fail_fast(20.0))
        .await
        .is_err());

    // Same tier cannot preempt; the waiter needs api's burst back
    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .allocate("jobs", ResourceRequest::wait_up_to(20.0, Duration::from_secs(5)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    manager.release(&held).await.unwrap();
    let allocation = waiter.await.unwrap().unwrap();
    assert_eq!(allocation.phase, AdmissionPhase::Burst);
    assert_eq!(allocation.guaranteed, 10.0);
    assert_eq!(allocation.burst, 10.0);
}

#[tokio::test]
async fn test_anomalies_are_filtered_and_counted() {
    let manager = manager(config(
        1_000.0,
        vec![ServiceConfig::new("web", ServiceTier::Standard, 10.0)],
    ));

    let now = unix_millis();
    let pattern = [98.0, 99.0, 100.0, 100.0, 101.0, 102.0];
    for i in 0..30 {
        manager
            .report("web", ResourceSample::cpu(now - (40 - i) * 1_000, pattern[i as usize % 6]))
            .unwrap();
    }
    manager
        .report("web", ResourceSample::cpu(now - 1_000, 50_000.0))
        .unwrap();

    let snapshot = manager.service_snapshot("web").unwrap();
    assert_eq!(snapshot.anomalies_total, 1);
    assert_eq!(snapshot.samples, 31);
    assert!(snapshot.statistics.unwrap().peak <= 102.0);
}

#[tokio::test]
async fn test_adjustment_pushes_new_limits() {
    let enforcer = Arc::new(RecordingEnforcer::default());
    let (_manager, _) = raised_best_effort(Arc::clone(&enforcer)).await;

    let calls = enforcer.calls_for("batch");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cpu, Some(100.0));
}

#[tokio::test]
async fn test_lowered_guarantee_keeps_capacity_in_use() {
    let enforcer = Arc::new(RecordingEnforcer::default());
    let (manager, now) = raised_best_effort(Arc::clone(&enforcer)).await;

    let allocation = manager.allocate("batch", ResourceRequest::fail_fast(200.0)).await.unwrap();
    assert_eq!(allocation.guaranteed, 100.0);
    assert_eq!(allocation.burst, 100.0);

    // The window rolls over to half the load
    feed_from(&manager, "batch", 50.0, now + 31_000, 30);
    assert!(manager.adjust_once().await.is_empty());

    let snapshot = manager.service_snapshot("batch").unwrap();
    assert_eq!(snapshot.current_guarantee, 100.0);
    assert!(snapshot.guaranteed_in_use <= snapshot.current_guarantee);
    assert!(snapshot.burst_held <= snapshot.max_burst);
    assert_eq!(manager.allocation("batch", allocation.id).unwrap().burst, 100.0);
}

#[tokio::test]
async fn test_lowered_guarantee_reclaims_burst_above_ceiling() {
    let enforcer = Arc::new(RecordingEnforcer::default());
    let (manager, now) = raised_best_effort(Arc::clone(&enforcer)).await;
    manager.health().register_all().await;
    let mut notices = manager.subscribe_preemptions();

    let base = manager.allocate("batch", ResourceRequest::fail_fast(100.0)).await.unwrap();
    let burst = manager.allocate("batch", ResourceRequest::fail_fast(100.0)).await.unwrap();
    assert_eq!(burst.burst, 100.0);
    manager.release(&base).await.unwrap();

    feed_from(&manager, "batch", 50.0, now + 31_000, 30);
    let changes = manager.adjust_once().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].1.new_guarantee, 50.0);

    let snapshot = manager.service_snapshot("batch").unwrap();
    assert_eq!(snapshot.max_burst, 50.0);
    assert_eq!(snapshot.burst_held, 50.0);
    assert_eq!(manager.pool().utilization().allocated, 50.0);
    assert_eq!(manager.allocation("batch", burst.id).unwrap().burst, 50.0);

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.allocation_id, burst.id);
    assert_eq!(notice.reclaimed, 50.0);
    assert_eq!(notice.preempted_by, "batch");

    // Guarantee 50 plus the 50 of burst still held
    assert_eq!(enforcer.calls_for("batch").last().and_then(|l| l.cpu), Some(100.0));
    assert_eq!(
        manager.health().status_of(components::BURST_POOL).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test]
async fn test_adjustment_cycle_reports_pool_health() {
    let manager = manager(config(
        200.0,
        vec![ServiceConfig::new("api", ServiceTier::Core, 100.0)],
    ));
    manager.health().register_all().await;
    manager
        .health()
        .set_degraded(components::BURST_POOL, "not yet audited")
        .await;

    manager.allocate("api", ResourceRequest::fail_fast(130.0)).await.unwrap();
    manager.adjust_once().await;

    assert_eq!(
        manager.health().status_of(components::BURST_POOL).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test]
async fn test_future_samples_rejected() {
    let manager = manager(config(
        100.0,
        vec![ServiceConfig::new("web", ServiceTier::Standard, 10.0)],
    ));
    feed_samples(&manager, "web", 10.0, 5);

    let err = manager
        .report("web", ResourceSample::cpu(unix_millis() + 3_600_000, 10.0))
        .unwrap_err();
    assert!(matches!(err, GovernorError::InvalidRequest(_)));

    // The window is untouched
    assert_eq!(manager.service_snapshot("web").unwrap().samples, 5);

    // Small clock skew is tolerated
    manager
        .report("web", ResourceSample::cpu(unix_millis() + 5_000, 10.0))
        .unwrap();
    assert_eq!(manager.service_snapshot("web").unwrap().samples, 6);
}

#[tokio::test]
async fn test_shutdown_stops_background_tasks() {
    let mut cfg = config(
        1_000.0,
        vec![ServiceConfig::new("web", ServiceTier::Standard, 10.0)],
    );
    cfg.sample_interval_ms = 5;
    cfg.adjust_interval_ms = 10;
    cfg.min_samples = 3;
    let manager = manager(cfg);

    manager.start().await;
    assert!(manager.health().readiness().await.ready);
    manager.spawn_sampler("web", Arc::new(ConstantFeed(50.0))).unwrap();
    assert!(manager.spawn_sampler("ghost", Arc::new(ConstantFeed(1.0))).is_err());

    // Guarantee climbs 10 -> 20 -> 40 -> 60 under the per-cycle rate limit
    tokio::time::sleep(Duration::from_millis(400)).await;
    tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
        .await
        .expect("shutdown should complete promptly");

    assert!(!manager.is_running());
    assert!(!manager.health().readiness().await.ready);

    let snapshot = manager.service_snapshot("web").unwrap();
    assert!(snapshot.samples >= 3);
    // Standard: 50 * 1.2 = 60
    assert!((snapshot.current_guarantee - 60.0).abs() < 1e-6);
}

#[test]
fn test_invalid_configuration_rejected() {
    let mut cfg = config(
        100.0,
        vec![ServiceConfig::new("api", ServiceTier::Core, 10.0)],
    );
    cfg.tiers.insert(
        ServiceTier::Core,
        TierPolicy {
            burst_ratio: 0.5,
            ..crate::quota::default_policy(ServiceTier::Core)
        },
    );
    assert!(matches!(
        AdaptiveResourceManager::new(cfg, Arc::new(NoopEnforcer)),
        Err(GovernorError::InvalidConfiguration(_))
    ));
}

#[derive(Debug, Clone)]
enum Op {
    Allocate { service: usize, amount: f64 },
    Release { index: usize },
    Publish { service: usize, guarantee: f64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, 1.0f64..120.0).prop_map(|(service, amount)| Op::Allocate { service, amount }),
        (0usize..32).prop_map(|index| Op::Release { index }),
        (0usize..4, 0.0f64..200.0).prop_map(|(service, guarantee)| Op::Publish { service, guarantee }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pool_and_quota_invariants_hold_across_resizes(ops in proptest::collection::vec(op(), 1..60)) {
        let names = ["crit", "core", "std", "be"];
        let registry = Arc::new(ServiceRegistry::new());
        let pool = Arc::new(BurstPool::new(400.0, Duration::ZERO));
        let coordinator = crate::allocation::AllocationCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            Arc::new(RwLock::new(TierPolicyTable::default())),
            Duration::from_millis(1),
        );
        for (name, tier) in names.iter().zip(ServiceTier::ALL) {
            let policy = crate::quota::default_policy(tier);
            let quota = AdaptiveQuota::new(tier, 40.0, policy.burst_ratio, 8);
            let metrics = RollingMetrics::new(
                crate::models::ResourceKind::Cpu,
                crate::stats::DEFAULT_WINDOW,
                AnomalyDetector::default(),
            );
            coordinator.register(ServiceEntry::new(*name, quota, None, metrics)).unwrap();
        }

        let mut live: Vec<Allocation> = Vec::new();
        for op in ops {
            match op {
                Op::Allocate { service, amount } => {
                    if let Ok(admission) = coordinator.try_allocate(names[service], amount) {
                        live.push(admission.allocation);
                    }
                }
                Op::Release { index } => {
                    if !live.is_empty() {
                        let allocation = live.remove(index % live.len());
                        prop_assert!(coordinator.release(&allocation).is_ok());
                        prop_assert!(coordinator.release(&allocation).is_err());
                    }
                }
                Op::Publish { service, guarantee } => {
                    let entry = registry.get(names[service]).unwrap();
                    let burst_ratio = crate::quota::default_policy(entry.tier).burst_ratio;
                    coordinator.publish_guarantee(&entry, guarantee, burst_ratio, "resized".to_string(), None, 0);
                }
            }

            let held: Vec<f64> = {
                let guard = pool.lock();
                prop_assert!(guard.allocated() <= guard.total_capacity() + 1e-9);
                let grants: f64 = guard.grants().map(|g: &BurstGrant| g.amount).sum();
                prop_assert!((grants - guard.allocated()).abs() < 1e-6);
                names.iter().map(|name| guard.held_by(name)).collect()
            };
            for (name, held) in names.iter().zip(held) {
                let entry = registry.get(name).unwrap();
                let quota = entry.quota();
                prop_assert!(quota.current_guarantee >= quota.base_minimum);
                prop_assert!(entry.guaranteed_in_use() <= quota.current_guarantee + 1e-9);
                prop_assert!(held <= quota.max_burst + 1e-9);
            }
        }
    }
}

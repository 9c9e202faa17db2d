//! Periodic quota adjustment

use super::AdaptiveResourceManager;
use crate::health::components;
use crate::models::{unix_millis, AdjustmentRecord};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

impl AdaptiveResourceManager {
    /// Run adjustment cycles until shutdown.
    ///
    /// Shutdown is only observed between cycles, so a cycle that started
    /// always publishes and enforces all of its records.
    pub(crate) async fn run_adjuster(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.adjust_interval_ms,
            "Starting quota adjustment loop"
        );

        let mut ticker = interval(self.config.adjust_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; there is nothing to adjust yet
        ticker.tick().await;

        let mut cycles = 0u64;
        let mut published = 0usize;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    published += self.adjust_once().await.len();
                    cycles += 1;
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycles, published = published, "Shutting down quota adjustment loop");
                    break;
                }
            }
        }
    }

    /// Run one adjustment cycle over every service.
    ///
    /// Statistics are computed under the metrics lock only. Publishing takes
    /// the service lock, then the pool lock when burst above a lowered
    /// ceiling has to be reclaimed. Enforcement happens after all locks are
    /// released.
    pub async fn adjust_once(&self) -> Vec<(String, AdjustmentRecord)> {
        let started = Instant::now();
        let now_ms = unix_millis();
        let mut changed = Vec::new();

        for entry in self.registry.list() {
            let statistics = entry.metrics.lock().statistics(now_ms);
            let Some(policy) = self
                .policies
                .read()
                .policy_for_service(&entry.name)
                .cloned()
            else {
                continue;
            };
            let quota = entry.quota();

            let Some(decision) = self
                .calculator
                .calculate(&quota, &policy, statistics.as_ref())
            else {
                continue;
            };

            let Some(published) = self.coordinator.publish_guarantee(
                &entry,
                decision.new_guarantee,
                policy.burst_ratio,
                decision.reason,
                Some(decision.statistics),
                now_ms,
            ) else {
                continue;
            };

            let record = published.record;
            self.logger.log_quota_adjusted(&entry.name, entry.tier, &record);
            self.metrics.set_quota(
                &entry.name,
                entry.tier,
                record.new_guarantee,
                published.max_burst,
            );
            self.metrics.inc_adjustments();

            if !published.reclaimed.is_empty() {
                self.metrics.inc_preemptions(published.reclaimed.len() as u64);
            }
            for notice in published.reclaimed {
                self.logger.log_preemption(&notice);
                let _ = self.preemptions.send(notice);
            }

            changed.push((entry.name.clone(), record));
        }

        for (name, _) in &changed {
            if let Some(entry) = self.registry.get(name) {
                self.enforce(&entry).await;
            }
        }
        if !changed.is_empty() {
            self.publish_pool_metrics();
            self.coordinator.notify_capacity();
        }
        self.audit_pool().await;

        self.health.set_healthy(components::ADJUSTER).await;
        self.metrics
            .observe_adjustment_duration(started.elapsed().as_secs_f64());
        debug!(
            services = self.registry.len(),
            changed = changed.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Adjustment cycle complete"
        );

        changed
    }
}

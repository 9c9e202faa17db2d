//! Periodic sampling of governed services
//!
//! One [`SamplingLoop`] runs per service, pulling from a [`MetricsFeed`] and
//! pushing into a [`SampleSink`] once per sampling interval.

use crate::error::GovernorError;
use crate::health::{components, HealthRegistry};
use crate::models::ResourceSample;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive feed failures before the sampler is reported degraded
const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Produces resource samples for a service
#[async_trait]
pub trait MetricsFeed: Send + Sync {
    async fn sample(&self, service: &str) -> Result<ResourceSample>;
}

/// Receives samples produced by a feed
pub trait SampleSink: Send + Sync {
    fn report(&self, service: &str, sample: ResourceSample) -> crate::error::Result<()>;
}

/// Sampling task for one service
pub struct SamplingLoop {
    service: String,
    feed: Arc<dyn MetricsFeed>,
    sink: Arc<dyn SampleSink>,
    interval: Duration,
    health: Option<HealthRegistry>,
}

impl SamplingLoop {
    pub fn new(
        service: impl Into<String>,
        feed: Arc<dyn MetricsFeed>,
        sink: Arc<dyn SampleSink>,
        interval: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            feed,
            sink,
            interval,
            health: None,
        }
    }

    /// Report feed failures to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until shutdown, or until the service is deregistered
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            service = %self.service,
            interval_ms = self.interval.as_millis() as u64,
            "Starting sampling loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.feed.sample(&self.service).await {
                        Ok(sample) => match self.sink.report(&self.service, sample) {
                            Ok(()) => {
                                if consecutive_failures >= DEGRADED_AFTER_FAILURES {
                                    self.mark_healthy().await;
                                }
                                consecutive_failures = 0;
                            }
                            Err(GovernorError::UnknownService(_)) => {
                                info!(service = %self.service, "Service deregistered, stopping sampling loop");
                                break;
                            }
                            Err(e) => {
                                warn!(service = %self.service, error = %e, "Failed to record sample");
                            }
                        },
                        Err(e) => {
                            consecutive_failures += 1;
                            debug!(
                                service = %self.service,
                                error = %e,
                                consecutive_failures = consecutive_failures,
                                "Failed to collect sample"
                            );
                            if consecutive_failures == DEGRADED_AFTER_FAILURES {
                                self.mark_degraded(&e.to_string()).await;
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(service = %self.service, "Shutting down sampling loop");
                    break;
                }
            }
        }
    }

    async fn mark_degraded(&self, error: &str) {
        warn!(service = %self.service, error = %error, "Metrics feed keeps failing");
        if let Some(health) = &self.health {
            health
                .set_degraded(
                    components::SAMPLER,
                    format!("feed for {} failing: {}", self.service, error),
                )
                .await;
        }
    }

    async fn mark_healthy(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(components::SAMPLER).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFeed {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl MetricsFeed for CountingFeed {
        async fn sample(&self, _service: &str) -> Result<ResourceSample> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("feed offline");
            }
            Ok(ResourceSample::cpu(n as i64 * 1_000, 1.0))
        }
    }

    #[derive(Default)]
    struct VecSink {
        samples: Mutex<Vec<(String, ResourceSample)>>,
        reject: bool,
    }

    impl SampleSink for VecSink {
        fn report(&self, service: &str, sample: ResourceSample) -> crate::error::Result<()> {
            if self.reject {
                return Err(GovernorError::UnknownService(service.to_string()));
            }
            self.samples.lock().push((service.to_string(), sample));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loop_pushes_samples_until_shutdown() {
        let feed = Arc::new(CountingFeed {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let sink = Arc::new(VecSink::default());
        let (tx, rx) = broadcast::channel(1);

        let sampling = SamplingLoop::new("api", feed.clone(), sink.clone(), Duration::from_millis(5));
        let handle = tokio::spawn(sampling.run(rx));

        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let samples = sink.samples.lock();
        assert!(samples.len() >= 2);
        assert!(samples.iter().all(|(service, _)| service == "api"));
    }

    #[tokio::test]
    async fn test_loop_stops_for_unknown_service() {
        let feed = Arc::new(CountingFeed {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let sink = Arc::new(VecSink {
            reject: true,
            ..Default::default()
        });
        let (_tx, rx) = broadcast::channel(1);

        let sampling = SamplingLoop::new("gone", feed.clone(), sink, Duration::from_millis(5));
        tokio::time::timeout(Duration::from_secs(1), sampling.run(rx))
            .await
            .expect("loop should exit on its own");
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_feed_degrades_sampler() {
        let feed = Arc::new(CountingFeed {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let health = HealthRegistry::new();
        health.register(components::SAMPLER).await;
        let (tx, rx) = broadcast::channel(1);

        let sampling = SamplingLoop::new("api", feed, Arc::new(VecSink::default()), Duration::from_millis(5))
            .with_health(health.clone());
        let handle = tokio::spawn(sampling.run(rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let report = health.health().await;
        assert_eq!(
            report.components[components::SAMPLER].status,
            crate::health::ComponentStatus::Degraded
        );
    }
}

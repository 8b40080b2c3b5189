//! C6: two independent timers driving batched, concurrency-bounded
//! probing of every known server, plus dispatch into active testing
//! once a server reports healthy.

use crate::probe::{self, ServerHealthReport};
use fleet_core::config::HealthConfig;
use fleet_core::{Clock, HttpProbe, ServerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One server as the scheduler needs to see it. Kept separate from a
/// full server-registry record so this crate never depends on one.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub id: ServerId,
    pub base_url: String,
    pub token: Option<String>,
}

/// Supplies the current server list on every tick, so additions and
/// removals take effect without restarting the scheduler.
pub trait ServerSource: Send + Sync {
    fn servers(&self) -> Vec<ServerEndpoint>;
}

/// Invoked after a successful health check, once per server per cycle.
/// The orchestrator wires this to the model-level active-test machinery;
/// a no-op implementation is fine for a health-only deployment.
#[async_trait::async_trait]
pub trait ActiveTestRunner: Send + Sync {
    async fn run_active_tests(&self, server: &ServerId, report: &ServerHealthReport);
}

pub struct NoActiveTests;

#[async_trait::async_trait]
impl ActiveTestRunner for NoActiveTests {
    async fn run_active_tests(&self, _server: &ServerId, _report: &ServerHealthReport) {}
}

/// Invoked once per server per cycle regardless of outcome, so a caller
/// can persist the observation (and detect unhealthy-to-healthy
/// transitions) even on a failed check. Separate from [`ActiveTestRunner`],
/// which only fires on a healthy result.
pub trait HealthObserver: Send + Sync {
    fn observe(&self, server: &ServerId, report: &ServerHealthReport);
}

pub struct NoHealthObserver;

impl HealthObserver for NoHealthObserver {
    fn observe(&self, _server: &ServerId, _report: &ServerHealthReport) {}
}

const MAIN_BATCH_PAUSE: Duration = Duration::from_millis(100);
const RECOVERY_BATCH_PAUSE: Duration = Duration::from_millis(500);

pub struct HealthScheduler {
    config: HealthConfig,
    probe: Arc<dyn HttpProbe>,
    clock: Arc<dyn Clock>,
    sources: Arc<dyn ServerSource>,
    active_tests: Arc<dyn ActiveTestRunner>,
    observer: Arc<dyn HealthObserver>,
    stopped: Arc<AtomicBool>,
}

impl HealthScheduler {
    pub fn new(
        config: HealthConfig,
        probe: Arc<dyn HttpProbe>,
        clock: Arc<dyn Clock>,
        sources: Arc<dyn ServerSource>,
        active_tests: Arc<dyn ActiveTestRunner>,
        observer: Arc<dyn HealthObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            probe,
            clock,
            sources,
            active_tests,
            observer,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawns the two interval loops and returns immediately. Dropping
    /// the returned handle does not stop the loops; call [`Self::shutdown`].
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let main = Arc::clone(self);
        tokio::spawn(async move { main.run_loop(main.config.interval, false).await });

        let recovery = Arc::clone(self);
        tokio::spawn(async move { recovery.run_loop(recovery.config.recovery_interval, true).await });
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn run_loop(self: &Arc<Self>, period: Duration, recovery_only: bool) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            self.run_cycle(recovery_only).await;
        }
    }

    /// Runs one full sweep of every known server, `maxConcurrentChecks`
    /// at a time, pausing briefly between batches so a large fleet does
    /// not saturate the network all at once.
    async fn run_cycle(&self, recovery_only: bool) {
        let servers = self.sources.servers();
        let pause = if recovery_only { RECOVERY_BATCH_PAUSE } else { MAIN_BATCH_PAUSE };
        let batch_size = self.config.max_concurrent_checks.max(1);

        for (i, batch) in servers.chunks(batch_size).enumerate() {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            let checks = batch.iter().map(|endpoint| self.check_one(endpoint));
            futures::future::join_all(checks).await;
        }
    }

    async fn check_one(&self, endpoint: &ServerEndpoint) {
        let report = self.check_with_retry(endpoint).await;
        self.observer.observe(&endpoint.id, &report);
        if report.healthy {
            self.active_tests.run_active_tests(&endpoint.id, &report).await;
        }
    }

    /// Retries a failing probe round up to `retryAttempts` times with
    /// exponential backoff, but only for errors `retry::is_retryable`
    /// recognizes; anything else is reported on the first attempt.
    async fn check_with_retry(&self, endpoint: &ServerEndpoint) -> ServerHealthReport {
        let mut attempt = 0;
        loop {
            let report = probe::check_server(
                self.probe.as_ref(),
                &endpoint.base_url,
                endpoint.token.as_deref(),
                self.config.interval.min(Duration::from_secs(30)),
            )
            .await;

            let retryable = report
                .tags_error
                .as_deref()
                .map(crate::retry::is_retryable)
                .unwrap_or(false);

            if report.healthy || !retryable || attempt >= self.config.retry_attempts {
                return report;
            }

            let delay = crate::retry::backoff_delay(self.config.retry_delay, self.config.backoff_multiplier, attempt);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

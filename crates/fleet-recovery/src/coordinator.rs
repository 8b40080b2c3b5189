//! C5: exactly one recovery probe per server at a time, never while the
//! server has client traffic in flight.

use crate::metrics::{ProbeMetric, RollingMetrics};
use crate::probes::{self, ProbeKind};
use fleet_breaker::BreakerRegistry;
use fleet_core::config::RecoveryConfig;
use fleet_core::{BreakerKey, Classification, Clock, ErrorKind, HttpProbe, ModelType, ServerId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Supplies the current in-flight request count for a server, so the
/// coordinator can honor `checkInFlightRequests` without this crate
/// depending on the server registry directly.
pub trait InFlightQuery: Send + Sync {
    fn in_flight(&self, server: &ServerId) -> usize;
}

/// Always reports zero in-flight requests; usable when
/// `checkInFlightRequests` is disabled or in tests.
pub struct NoInFlightTracking;

impl InFlightQuery for NoInFlightTracking {
    fn in_flight(&self, _server: &ServerId) -> usize {
        0
    }
}

struct ServerState {
    last_test_time_ms: i64,
    active: HashSet<BreakerKey>,
    queue: VecDeque<BreakerKey>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            last_test_time_ms: i64::MIN / 2,
            active: HashSet::new(),
            queue: VecDeque::new(),
        }
    }
}

pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    registry: Arc<BreakerRegistry>,
    probe: Arc<dyn HttpProbe>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<dyn InFlightQuery>,
    states: Mutex<HashMap<ServerId, ServerState>>,
    metrics: Mutex<RollingMetrics>,
}

const DEFAULT_METRICS_CAPACITY: usize = 500;

impl RecoveryCoordinator {
    pub fn new(
        config: RecoveryConfig,
        registry: Arc<BreakerRegistry>,
        probe: Arc<dyn HttpProbe>,
        clock: Arc<dyn Clock>,
        in_flight: Arc<dyn InFlightQuery>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            probe,
            clock,
            in_flight,
            states: Mutex::new(HashMap::new()),
            metrics: Mutex::new(RollingMetrics::new(DEFAULT_METRICS_CAPACITY)),
        })
    }

    pub fn is_ready(&self, server: &ServerId) -> bool {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(server.clone()).or_insert_with(ServerState::new);
        if !state.active.is_empty() {
            return false;
        }
        let elapsed = fleet_core::elapsed_ms_clamped(self.clock.as_ref(), state.last_test_time_ms);
        if elapsed < self.config.server_cooldown.as_millis() as i64 {
            return false;
        }
        if self.config.check_in_flight_requests && self.in_flight.in_flight(server) > 0 {
            return false;
        }
        true
    }

    pub fn enqueue(&self, key: BreakerKey) -> Result<(), crate::error::RecoveryError> {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(key.server_id().clone()).or_insert_with(ServerState::new);
        if state.queue.contains(&key) || state.active.contains(&key) {
            return Ok(());
        }
        if state.queue.len() >= self.config.max_queue_size_per_server {
            return Err(crate::error::RecoveryError::QueueFull(key.server_id().to_string()));
        }
        state.queue.push_back(key);
        Ok(())
    }

    pub fn cancel_test(&self, key: &BreakerKey) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(key.server_id()) {
            state.queue.retain(|k| k != key);
            state.active.remove(key);
        }
    }

    pub fn clear_all_queues(&self) {
        self.states.lock().unwrap().clear();
    }

    pub fn metrics_snapshot(&self) -> Vec<ProbeMetric> {
        self.metrics.lock().unwrap().snapshot(self.clock.now_ms())
    }

    /// Drains up to `maxConcurrentPerServer` queued tests for every
    /// server that is currently ready, oldest `halfOpenStartedAt` first.
    /// Returns the keys actually started this cycle.
    pub async fn run_due_tests(self: &Arc<Self>, base_url_for: &(dyn Fn(&ServerId) -> Option<String> + Send + Sync)) -> Vec<BreakerKey> {
        let ready_batches = self.claim_ready_batches();
        let mut started = Vec::new();
        let mut handles = Vec::new();

        for key in ready_batches {
            let Some(base_url) = base_url_for(key.server_id()) else {
                self.finish(&key);
                continue;
            };
            started.push(key.clone());
            let this = Arc::clone(self);
            let key_for_task = key.clone();
            handles.push(tokio::spawn(async move {
                this.run_one(key_for_task, base_url).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        started
    }

    fn claim_ready_batches(&self) -> Vec<BreakerKey> {
        let mut states = self.states.lock().unwrap();
        let mut claimed = Vec::new();

        for (server, state) in states.iter_mut() {
            if !state.active.is_empty() {
                continue;
            }
            let elapsed = fleet_core::elapsed_ms_clamped(self.clock.as_ref(), state.last_test_time_ms);
            if elapsed < self.config.server_cooldown.as_millis() as i64 {
                continue;
            }
            if self.config.check_in_flight_requests && self.in_flight.in_flight(server) > 0 {
                continue;
            }

            let mut ordered: Vec<BreakerKey> = state.queue.drain(..).collect();
            ordered.sort_by_key(|key| {
                self.registry
                    .get(key)
                    .and_then(|c| c.stats().half_open_started_at_ms)
                    .unwrap_or(i64::MAX)
            });

            let take = self.config.max_concurrent_per_server.min(ordered.len());
            for key in ordered.drain(..take) {
                state.active.insert(key.clone());
                claimed.push(key);
            }
            for leftover in ordered {
                state.queue.push_back(leftover);
            }
        }
        claimed
    }

    fn finish(&self, key: &BreakerKey) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(key.server_id()) {
            state.active.remove(key);
            state.last_test_time_ms = self.clock.now_ms();
        }
    }

    async fn run_one(&self, key: BreakerKey, base_url: String) {
        let Some(circuit) = self.registry.get(&key) else {
            self.finish(&key);
            return;
        };
        circuit.mark_test_started();

        let start_ms = self.clock.now_ms();
        let kind = probes::select(&key, circuit.model_type());
        let model = key.model_name().map(|m| m.as_str());
        let request = probes::build_request(kind, model);

        let outcome = self.probe.call(&base_url, request).await;
        let duration = std::time::Duration::from_millis(
            (self.clock.now_ms() - start_ms).max(0) as u64,
        );

        let (success, timed_out, error) = match &outcome {
            Ok(response) if response.is_success() => (true, false, None),
            Ok(response) => (false, false, Some(format!("status {}", response.status))),
            Err(e) => (false, matches!(e, fleet_core::ProbeError::Timeout(_)), Some(e.to_string())),
        };

        if success {
            circuit.record_success(self.clock.as_ref());
        } else {
            let message = error.clone().unwrap_or_default();
            if kind == ProbeKind::Inference && message.to_ascii_lowercase().contains("does not support generate") {
                circuit.set_model_type(ModelType::Embedding);
            }
            // Recovery probe failures always record as `transient`
            // regardless of the underlying cause, independent of the
            // general-purpose classifier used for live request traffic.
            let classification = Classification::new(ErrorKind::Transient, true);
            let failure = fleet_breaker::UpstreamFailure::new(message);
            circuit.record_failure(self.clock.as_ref(), classification, &failure);
        }

        self.metrics.lock().unwrap().record(
            self.clock.now_ms(),
            ProbeMetric {
                breaker_name: key.to_string(),
                start_ms,
                duration,
                success,
                timed_out,
                cancelled: false,
                error,
            },
        );

        circuit.mark_test_finished();
        self.finish(&key);
    }
}

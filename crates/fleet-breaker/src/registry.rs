//! C4: named lookup of [`Circuit`]s plus debounced snapshot/restore.
//!
//! The registry owns *when* to persist (a `Notify`-driven background
//! task that sleeps for the configured debounce window before writing)
//! and *what* to persist (a JSON snapshot of every circuit's stats);
//! the durable write itself goes through the injected
//! [`PersistenceStore`].

use crate::circuit::{Circuit, CircuitConfig, CircuitState, CircuitStats};
use crate::error::BreakerError;
use crate::events::BreakerStateTransition;
use fleet_core::config::{BreakerConfig, PersistenceConfig};
use fleet_core::{BreakerKey, Clock, ErrorKind, EventListeners, ModelType, PersistenceStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::Notify;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct PersistedCircuit {
    key: String,
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_request_count: u64,
    blocked_request_count: u64,
    consecutive_failed_recoveries: u32,
    consecutive_successes: u32,
    last_failure_ms: Option<i64>,
    last_success_ms: Option<i64>,
    next_retry_at_ms: Option<i64>,
    half_open_started_at_ms: Option<i64>,
    last_failure_reason: Option<String>,
    last_error_kind: Option<ErrorKind>,
    error_rate: f64,
    error_counts: HashMap<ErrorKind, u32>,
    model_type: Option<ModelType>,
    learned_rate_limit_backoff_ms: Option<i64>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Snapshot {
    circuits: Vec<PersistedCircuit>,
}

struct RegistryState {
    circuits: HashMap<BreakerKey, Arc<Circuit>>,
    config: BreakerConfig,
}

/// A named collection of circuits, with debounced persistence.
///
/// `clock` and `store` are injected; the registry itself performs no
/// I/O beyond scheduling a save through `store`.
pub struct BreakerRegistry {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn PersistenceStore>>,
    persistence_config: PersistenceConfig,
    dirty: Arc<Notify>,
    listeners: Mutex<EventListeners<BreakerStateTransition>>,
}

impl BreakerRegistry {
    pub fn new(
        config: BreakerConfig,
        persistence_config: PersistenceConfig,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn PersistenceStore>>,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            state: Mutex::new(RegistryState {
                circuits: HashMap::new(),
                config,
            }),
            clock,
            store,
            persistence_config,
            dirty: Arc::new(Notify::new()),
            listeners: Mutex::new(EventListeners::new()),
        });
        if registry.persistence_config.enabled && registry.store.is_some() {
            registry.clone().spawn_debounced_writer();
        }
        registry
    }

    pub fn add_listener<L>(&self, listener: L)
    where
        L: fleet_core::EventListener<BreakerStateTransition> + 'static,
    {
        self.listeners.lock().unwrap().add(listener);
    }

    fn spawn_debounced_writer(self: Arc<Self>) {
        let debounce = self.persistence_config.debounce;
        tokio::spawn(async move {
            loop {
                self.dirty.notified().await;
                tokio::time::sleep(debounce).await;
                if let Err(_err) = self.persist_now().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("breaker persistence write failed: {_err}");
                }
            }
        });
    }

    fn mark_dirty(&self) {
        if self.persistence_config.enabled && self.store.is_some() {
            self.dirty.notify_one();
        }
    }

    /// Looks up an existing circuit for `key`, creating one with the
    /// registry's current config if it does not exist yet.
    pub fn get_or_create(&self, key: BreakerKey) -> Arc<Circuit> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.circuits.get(&key) {
            return Arc::clone(existing);
        }
        let config = CircuitConfig::from(&state.config);
        let circuit = Arc::new(Circuit::new(key.clone(), config));
        state.circuits.insert(key, Arc::clone(&circuit));
        circuit
    }

    pub fn get(&self, key: &BreakerKey) -> Option<Arc<Circuit>> {
        self.state.lock().unwrap().circuits.get(key).cloned()
    }

    pub fn remove(&self, key: &BreakerKey) -> Option<Arc<Circuit>> {
        let removed = self.state.lock().unwrap().circuits.remove(key);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    /// Removes `prefix`'s own breaker plus every `prefix:*` model-level
    /// breaker, used when a server is deleted.
    pub fn remove_by_prefix(&self, prefix: &fleet_core::ServerId) {
        let mut state = self.state.lock().unwrap();
        state.circuits.retain(|key, _| !key.belongs_to(prefix));
        drop(state);
        self.mark_dirty();
    }

    pub fn get_all_stats(&self) -> HashMap<String, CircuitStats> {
        let state = self.state.lock().unwrap();
        state
            .circuits
            .iter()
            .map(|(key, circuit)| (key.to_string(), circuit.stats()))
            .collect()
    }

    pub fn update_all_config(&self, config: BreakerConfig) {
        self.state.lock().unwrap().config = config;
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().circuits.clear();
        self.mark_dirty();
    }

    pub fn notify_transition(&self, key: &BreakerKey, from: CircuitState, to: CircuitState, reason: Option<String>) {
        self.listeners.lock().unwrap().emit(&BreakerStateTransition {
            key: key.to_string(),
            from,
            to,
            reason,
            at: Instant::now(),
        });
        self.mark_dirty();
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        let circuits = state
            .circuits
            .iter()
            .map(|(key, circuit)| {
                let stats = circuit.stats();
                PersistedCircuit {
                    key: key.to_string(),
                    state: stats.state,
                    failure_count: stats.failure_count,
                    success_count: stats.success_count,
                    total_request_count: stats.total_request_count,
                    blocked_request_count: stats.blocked_request_count,
                    consecutive_failed_recoveries: stats.consecutive_failed_recoveries,
                    consecutive_successes: stats.consecutive_successes,
                    last_failure_ms: stats.last_failure_ms,
                    last_success_ms: stats.last_success_ms,
                    next_retry_at_ms: stats.next_retry_at_ms,
                    half_open_started_at_ms: stats.half_open_started_at_ms,
                    last_failure_reason: stats.last_failure_reason,
                    last_error_kind: stats.last_error_kind,
                    error_rate: stats.error_rate,
                    error_counts: stats.error_counts,
                    model_type: stats.model_type,
                    learned_rate_limit_backoff_ms: stats.learned_rate_limit_backoff_ms,
                }
            })
            .collect();
        Snapshot { circuits }
    }

    pub async fn persist_now(&self) -> Result<(), BreakerError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        let bytes = serde_json::to_vec(&snapshot)?;
        store.save(&self.persistence_config.key, bytes).await?;
        Ok(())
    }

    /// Restores circuits from a previously persisted snapshot. Any
    /// circuit whose state is `open` and whose `nextRetryAt` has already
    /// passed comes back as `half-open` instead (see [`Circuit::restore`]).
    pub async fn load_persisted_state(&self) -> Result<(), BreakerError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(bytes) = store.load(&self.persistence_config.key).await? else {
            return Ok(());
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let config = CircuitConfig::from(&self.state.lock().unwrap().config);

        for persisted in snapshot.circuits {
            let Ok(key) = BreakerKey::parse(&persisted.key) else {
                continue;
            };
            let circuit = Circuit::new(key.clone(), config.clone());
            circuit.restore(
                persisted.state,
                persisted.failure_count,
                persisted.success_count,
                persisted.total_request_count,
                persisted.blocked_request_count,
                persisted.consecutive_failed_recoveries,
                persisted.consecutive_successes,
                persisted.last_failure_ms,
                persisted.last_success_ms,
                persisted.next_retry_at_ms,
                persisted.half_open_started_at_ms,
                persisted.last_failure_reason,
                persisted.last_error_kind,
                persisted.error_rate,
                persisted.error_counts,
                persisted.model_type,
                persisted.learned_rate_limit_backoff_ms,
                self.clock.now_ms(),
            );
            self.state.lock().unwrap().circuits.insert(key, Arc::new(circuit));
        }
        Ok(())
    }
}

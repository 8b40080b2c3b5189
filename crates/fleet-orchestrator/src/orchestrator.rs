//! C11: the facade. Owns construction and lifecycle of every other
//! component, wires the crate-local adapters from [`crate::wiring`]
//! together, and is the one place a caller needs to hold a reference to.

use crate::error::OrchestratorError;
use crate::queue_admission::{Admission, QueueAdmission};
use crate::wiring::{ActiveTestAdapter, HealthObserverAdapter, ServerSourceAdapter};
use fleet_breaker::{BreakerRegistry, Circuit, CircuitState, CircuitStats};
use fleet_core::config::FleetConfig;
use fleet_core::{BreakerKey, Capability, Clock, HttpProbe, ModelName, PersistenceStore, ServerId};
use fleet_health::{HealthScheduler, NoActiveTests};
use fleet_recovery::RecoveryCoordinator;
use fleet_registry::{BanDetails, Server, ServerRegistry};
use fleet_router::{AttemptError, Router, RoutingContext};
use fleet_tags::{MergedModelEntry, TagsAggregator};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECOVERY_DISPATCH_INTERVAL: Duration = Duration::from_millis(250);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct FleetOrchestrator {
    config: FleetConfig,
    clock: Arc<dyn Clock>,
    servers: Arc<ServerRegistry>,
    breakers: Arc<BreakerRegistry>,
    recovery: Arc<RecoveryCoordinator>,
    health: Arc<HealthScheduler>,
    router: Arc<Router>,
    tags: Arc<TagsAggregator>,
    queue: Arc<QueueAdmission>,
    stopped: Arc<AtomicBool>,
}

impl FleetOrchestrator {
    pub fn new(config: FleetConfig, probe: Arc<dyn HttpProbe>, clock: Arc<dyn Clock>, persistence: Option<Arc<dyn PersistenceStore>>) -> Arc<Self> {
        let breakers = BreakerRegistry::new(config.breaker.clone(), config.persistence.clone(), clock.clone(), persistence);
        let servers = ServerRegistry::new(breakers.clone(), clock.clone(), config.router.cooldown_duration.as_millis() as i64);
        let tags = Arc::new(TagsAggregator::new(config.tags.clone(), probe.clone(), clock.clone(), servers.clone(), breakers.clone()));
        let recovery = RecoveryCoordinator::new(config.recovery.clone(), breakers.clone(), probe.clone(), clock.clone(), servers.clone());
        let router = Arc::new(Router::new(config.router.clone(), servers.clone(), breakers.clone(), clock.clone()));

        let health = if config.health.enabled {
            HealthScheduler::new(
                config.health.clone(),
                probe.clone(),
                clock.clone(),
                Arc::new(ServerSourceAdapter { servers: servers.clone() }),
                Arc::new(ActiveTestAdapter { breakers: breakers.clone(), recovery: recovery.clone() }),
                Arc::new(HealthObserverAdapter { servers: servers.clone(), tags: tags.clone() }),
            )
        } else {
            HealthScheduler::new(
                config.health.clone(),
                probe.clone(),
                clock.clone(),
                Arc::new(ServerSourceAdapter { servers: servers.clone() }),
                Arc::new(NoActiveTests),
                Arc::new(HealthObserverAdapter { servers: servers.clone(), tags: tags.clone() }),
            )
        };

        let queue = Arc::new(QueueAdmission::new(config.queue.clone(), clock.clone(), router.clone()));

        Arc::new(Self {
            config,
            clock,
            servers,
            breakers,
            recovery,
            health,
            router,
            tags,
            queue,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Loads any persisted breaker state, then starts the health
    /// scheduler, the queue dispatcher and the recovery-test ticker.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        self.breakers.load_persisted_state().await?;
        self.health.start();
        self.queue.start();
        self.spawn_recovery_ticker();
        Ok(())
    }

    fn spawn_recovery_ticker(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECOVERY_DISPATCH_INTERVAL);
            loop {
                ticker.tick().await;
                if this.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let servers = this.servers.clone();
                this.recovery
                    .run_due_tests(&|id: &ServerId| servers.get_server(id).map(|s| s.url.clone()))
                    .await;
            }
        });
    }

    /// Stops the scheduler and dispatchers, flushes any dirty breaker
    /// state, and waits (up to `timeout`) for in-flight work to drain.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), OrchestratorError> {
        self.health.shutdown();
        self.queue.shutdown();
        self.stopped.store(true, Ordering::SeqCst);
        self.breakers.persist_now().await?;
        self.wait_for_quiescence(timeout).await
    }

    /// Marks every known server draining so candidate selection excludes
    /// them, then waits for the queue to empty and in-flight to reach
    /// zero, or `timeout`, whichever comes first.
    pub async fn drain(&self, timeout: Duration) -> Result<(), OrchestratorError> {
        for server in self.servers.get_servers() {
            let _ = self.servers.set_draining(&server.id, true);
        }
        self.wait_for_quiescence(timeout).await
    }

    async fn wait_for_quiescence(&self, timeout: Duration) -> Result<(), OrchestratorError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let total_in_flight: u32 = self.servers.get_servers().iter().map(|s| self.servers.total_in_flight(&s.id)).sum();
            if self.queue.queue().size() == 0 && total_in_flight == 0 {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(OrchestratorError::DrainTimedOut);
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    // -- request execution -------------------------------------------------

    pub async fn try_request_with_failover<F, Fut, T>(
        &self,
        model: &str,
        capability: Capability,
        op: F,
        ctx: Option<&mut RoutingContext>,
    ) -> Result<T, fleet_router::RouterError>
    where
        F: Fn(&Server) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        self.router.try_request_with_failover(model, capability, op, ctx).await
    }

    pub async fn request_to_server<F, Fut, T>(
        &self,
        server_id: &ServerId,
        model: &str,
        bypass_circuit_breaker: bool,
        op: F,
    ) -> Result<T, fleet_router::RouterError>
    where
        F: FnOnce(&Server) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        self.router.request_to_server(server_id, model, bypass_circuit_breaker, op).await
    }

    /// Admission-controlled entry point: queues behind the priority
    /// queue when no server currently has room for `model`.
    pub fn submit_request(
        &self,
        model: &str,
        capability: Capability,
        priority: u32,
        deadline_ms: i64,
        client_id: Option<String>,
    ) -> Result<Admission, fleet_queue::QueueError> {
        self.queue.submit(model, capability, priority, deadline_ms, client_id)
    }

    // -- tags / models ------------------------------------------------------

    pub async fn get_aggregated_tags(&self) -> Vec<MergedModelEntry> {
        self.tags.get_aggregated_tags().await
    }

    pub fn clear_tags_cache(&self) {
        self.tags.clear_tags_cache();
    }

    /// Union of every eligible, OpenAI-capable server's advertised
    /// `/v1/models` list, excluding any model whose per-server breaker is
    /// open. Unlike [`Self::get_aggregated_tags`], this reads the health
    /// scheduler's last-known listing rather than fanning out itself —
    /// the spec only asks for a dedicated cache on the Ollama tags path.
    pub fn get_aggregated_openai_models(&self) -> Vec<String> {
        let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for server in self.servers.get_servers() {
            if !server.is_eligible() || !server.supports_v1 {
                continue;
            }
            for model in &server.v1_models {
                let Ok(model_name) = ModelName::new(model) else { continue };
                let open = self
                    .breakers
                    .get(&BreakerKey::model(server.id.clone(), model_name))
                    .map(|b| b.state() == CircuitState::Open)
                    .unwrap_or(false);
                if !open {
                    names.insert(model.clone());
                }
            }
        }
        names.into_iter().collect()
    }

    // -- server admin --------------------------------------------------------

    pub fn add_server(&self, id: &str, url: impl Into<String>, max_concurrency: u32, token_reference: Option<String>) -> Result<(), OrchestratorError> {
        let id = ServerId::new(id)?;
        let mut server = Server::new(id, url, max_concurrency);
        if let Some(reference) = token_reference {
            server = server.with_token_reference(reference);
        }
        self.servers.add_server(server)?;
        self.tags.clear_tags_cache();
        Ok(())
    }

    pub fn remove_server(&self, id: &str) -> Result<(), OrchestratorError> {
        let id = ServerId::new(id)?;
        self.servers.remove_server(&id)?;
        self.tags.clear_tags_cache();
        Ok(())
    }

    pub fn update_server(&self, id: &str, max_concurrency: Option<u32>) -> Result<(), OrchestratorError> {
        let id = ServerId::new(id)?;
        self.servers.update_server(&id, max_concurrency)?;
        self.tags.clear_tags_cache();
        Ok(())
    }

    pub fn list_servers(&self) -> Vec<Server> {
        self.servers.get_servers()
    }

    pub fn get_all_models(&self) -> Vec<String> {
        self.servers.get_all_models()
    }

    // -- breaker / recovery admin --------------------------------------------

    pub fn get_breaker_stats(&self, key: &str) -> Result<CircuitStats, OrchestratorError> {
        let key = BreakerKey::parse(key)?;
        self.breakers.get(&key).map(|c| c.stats()).ok_or_else(|| OrchestratorError::BreakerNotFound(key.to_string()))
    }

    pub fn get_all_breaker_stats(&self) -> std::collections::HashMap<String, CircuitStats> {
        self.breakers.get_all_stats()
    }

    pub fn force_open_breaker(&self, key: &str, for_duration: Duration) -> Result<(), OrchestratorError> {
        self.with_breaker(key, |c| c.force_open(self.clock.as_ref(), for_duration))
    }

    pub fn force_close_breaker(&self, key: &str) -> Result<(), OrchestratorError> {
        self.with_breaker(key, |c| c.force_closed())
    }

    pub fn reset_breaker(&self, key: &str) -> Result<(), OrchestratorError> {
        self.with_breaker(key, |c| c.reset())
    }

    fn with_breaker(&self, key: &str, f: impl FnOnce(&Circuit)) -> Result<(), OrchestratorError> {
        let key = BreakerKey::parse(key)?;
        let circuit = self.breakers.get(&key).ok_or_else(|| OrchestratorError::BreakerNotFound(key.to_string()))?;
        f(circuit.as_ref());
        Ok(())
    }

    pub fn cancel_test(&self, key: &str) -> Result<(), OrchestratorError> {
        let key = BreakerKey::parse(key)?;
        self.recovery.cancel_test(&key);
        Ok(())
    }

    // -- bans / cooldowns -----------------------------------------------------

    pub fn ban(&self, server: &str, model: &str, reason: Option<String>) -> Result<(), OrchestratorError> {
        let server = ServerId::new(server)?;
        self.servers.ban(&server, model, reason);
        Ok(())
    }

    pub fn unban(&self, server: &str, model: &str) -> Result<(), OrchestratorError> {
        let server = ServerId::new(server)?;
        self.servers.unban(&server, model);
        Ok(())
    }

    pub fn unban_server(&self, server: &str) -> Result<(), OrchestratorError> {
        let server = ServerId::new(server)?;
        self.servers.unban_server(&server);
        Ok(())
    }

    pub fn unban_model(&self, model: &str) {
        self.servers.unban_model(model);
    }

    pub fn clear_all_bans(&self) {
        self.servers.clear_all_bans();
    }

    pub fn get_ban_details(&self) -> Vec<BanDetails> {
        self.servers.get_ban_details()
    }

    // -- queue admin -----------------------------------------------------------

    pub fn pause_queue(&self) {
        self.queue.queue().pause();
    }

    pub fn resume_queue(&self) {
        self.queue.queue().resume();
    }

    pub fn queue_stats(&self) -> fleet_queue::QueueStats {
        self.queue.queue().stats()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }
}

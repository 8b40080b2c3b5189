//! Adapters translating between crate-local traits so C5, C6, C8 and
//! C10 can stay mutually decoupled. This is the one module in the
//! workspace allowed to name every other crate's concrete types.

use fleet_breaker::{BreakerRegistry, CircuitState};
use fleet_core::{BreakerKey, ServerId};
use fleet_health::{ActiveTestRunner, HealthObserver, ServerEndpoint, ServerHealthReport, ServerSource};
use fleet_recovery::RecoveryCoordinator;
use fleet_registry::{HealthObservation, ServerRegistry};
use fleet_tags::TagsAggregator;
use std::sync::Arc;

/// Feeds the health scheduler the current server list on every tick.
pub struct ServerSourceAdapter {
    pub servers: Arc<ServerRegistry>,
}

impl ServerSource for ServerSourceAdapter {
    fn servers(&self) -> Vec<ServerEndpoint> {
        self.servers
            .get_servers()
            .into_iter()
            .map(|s| ServerEndpoint { id: s.id.clone(), base_url: s.url.clone(), token: s.resolved_token() })
            .collect()
    }
}

/// Writes every health-check result back into the registry, and
/// invalidates the tags cache the moment a server flips from unhealthy
/// to healthy so a newly-recovered server's models show up promptly.
pub struct HealthObserverAdapter {
    pub servers: Arc<ServerRegistry>,
    pub tags: Arc<TagsAggregator>,
}

impl HealthObserver for HealthObserverAdapter {
    fn observe(&self, server: &ServerId, report: &ServerHealthReport) {
        let was_healthy = self.servers.get_server(server).map(|s| s.healthy).unwrap_or(false);

        let observation = HealthObservation {
            healthy: report.healthy,
            supports_ollama: report.supports_generate,
            supports_v1: report.supports_openai,
            models: report.ollama_models.clone(),
            v1_models: report.v1_model_ids.clone(),
            last_response_time: report.response_time,
            loaded_models: report.loaded_models.iter().map(|m| (m.name.clone(), m.size_vram)).collect(),
            total_vram_used: report.total_vram_used,
        };
        let _ = self.servers.record_health_observation(server, observation);

        if report.healthy && !was_healthy {
            self.tags.on_server_became_healthy();
        }
    }
}

/// Once a server reports healthy, any of its model-level breakers
/// sitting half-open get a queued recovery probe so the coordinator's
/// next cycle can pick them up.
pub struct ActiveTestAdapter {
    pub breakers: Arc<BreakerRegistry>,
    pub recovery: Arc<RecoveryCoordinator>,
}

#[async_trait::async_trait]
impl ActiveTestRunner for ActiveTestAdapter {
    async fn run_active_tests(&self, server: &ServerId, _report: &ServerHealthReport) {
        let prefix = format!("{server}:");
        for (key_str, stats) in self.breakers.get_all_stats() {
            if stats.state != CircuitState::HalfOpen || !key_str.starts_with(&prefix) {
                continue;
            }
            if let Ok(key) = BreakerKey::parse(&key_str) {
                let _ = self.recovery.enqueue(key);
            }
        }
    }
}

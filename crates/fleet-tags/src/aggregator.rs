//! Batched fan-out across every healthy Ollama-capable server, merged
//! into a single model listing and cached behind a TTL.

use crate::cache::TagsCache;
use crate::model::{self, MergedModelEntry, ModelTag};
use crate::probe;
use fleet_breaker::{BreakerRegistry, CircuitState};
use fleet_core::config::TagsConfig;
use fleet_core::{BreakerKey, Clock, HttpProbe, ModelName, ServerId};
use fleet_registry::ServerRegistry;
use std::sync::Arc;

pub struct TagsAggregator {
    config: TagsConfig,
    probe: Arc<dyn HttpProbe>,
    clock: Arc<dyn Clock>,
    servers: Arc<ServerRegistry>,
    breakers: Arc<BreakerRegistry>,
    cache: TagsCache,
}

impl TagsAggregator {
    pub fn new(config: TagsConfig, probe: Arc<dyn HttpProbe>, clock: Arc<dyn Clock>, servers: Arc<ServerRegistry>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { config, probe, clock, servers, breakers, cache: TagsCache::new() }
    }

    pub fn clear_tags_cache(&self) {
        self.cache.invalidate();
    }

    /// Called whenever a server transitions from unhealthy to healthy,
    /// so a newly-recovered server's models show up without waiting out
    /// the rest of the current TTL window.
    pub fn on_server_became_healthy(&self) {
        self.cache.invalidate();
    }

    pub async fn get_aggregated_tags(&self) -> Vec<MergedModelEntry> {
        let eligible: Vec<_> = self
            .servers
            .get_servers()
            .into_iter()
            .filter(|s| s.is_eligible() && s.supports_ollama)
            .collect();

        let now_ms = self.clock.now_ms();
        let ttl_ms = self.config.ttl.as_millis() as i64;
        if !eligible.is_empty() {
            if let Some(cached) = self.cache.get_fresh(now_ms, ttl_ms) {
                return cached;
            }
        }

        if eligible.is_empty() {
            return self.cache.get_stale().unwrap_or_default();
        }

        let mut per_server: Vec<(ServerId, Vec<ModelTag>)> = Vec::new();
        for batch in eligible.chunks(self.config.fanout_batch_size.max(1)) {
            let calls = batch.iter().map(|server| {
                let probe = self.probe.as_ref();
                let base_url = server.url.clone();
                let token = server.resolved_token();
                async move { probe::fetch_tags(probe, &base_url, token.as_deref()).await }
            });
            let results = futures::future::join_all(calls).await;

            for (server, result) in batch.iter().zip(results) {
                if let Ok(tags) = result {
                    let filtered = self.exclude_breaker_open(&server.id, tags);
                    per_server.push((server.id.clone(), filtered));
                }
            }

            if !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        if per_server.is_empty() {
            return self.cache.get_stale().unwrap_or_default();
        }

        let merged = model::merge(per_server);
        self.cache.store(merged.clone(), now_ms);
        merged
    }

    fn exclude_breaker_open(&self, server_id: &ServerId, tags: Vec<ModelTag>) -> Vec<ModelTag> {
        tags.into_iter()
            .filter(|tag| {
                let Ok(model_name) = ModelName::new(&tag.name) else {
                    return true;
                };
                match self.breakers.get(&BreakerKey::model(server_id.clone(), model_name)) {
                    Some(breaker) => breaker.state() != CircuitState::Open,
                    None => true,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::config::{BreakerConfig, PersistenceConfig};
    use fleet_core::{FakeClock, ProbeError, ProbeRequest, ProbeResponse};
    use fleet_registry::{HealthObservation, Server};
    use std::time::Duration;

    struct ScriptedProbe {
        tags_by_host: std::collections::HashMap<String, &'static str>,
    }

    #[async_trait::async_trait]
    impl HttpProbe for ScriptedProbe {
        async fn call(&self, base: &str, _req: ProbeRequest) -> Result<ProbeResponse, ProbeError> {
            match self.tags_by_host.get(base) {
                Some(body) => Ok(ProbeResponse { status: 200, body: body.as_bytes().to_vec(), elapsed: Duration::from_millis(1) }),
                None => Err(ProbeError::ConnectionRefused),
            }
        }
    }

    fn healthy_server(id: &str) -> Server {
        let mut server = Server::new(ServerId::new(id).unwrap(), format!("http://{id}"), 4);
        server.apply_health_observation(HealthObservation {
            healthy: true,
            supports_ollama: true,
            supports_v1: false,
            models: vec!["llama3".into()],
            v1_models: vec![],
            last_response_time: Duration::from_millis(10),
            loaded_models: vec![],
            total_vram_used: 0,
        });
        server
    }

    fn setup(probe: ScriptedProbe) -> (TagsAggregator, Arc<ServerRegistry>) {
        let clock = Arc::new(FakeClock::new(0));
        let breakers = BreakerRegistry::new(
            BreakerConfig::default(),
            PersistenceConfig { enabled: false, ..PersistenceConfig::default() },
            clock.clone(),
            None,
        );
        let servers = ServerRegistry::new(breakers.clone(), clock.clone(), 5_000);
        let aggregator = TagsAggregator::new(TagsConfig::default(), Arc::new(probe), clock, servers.clone(), breakers);
        (aggregator, servers)
    }

    #[tokio::test]
    async fn merges_two_servers_advertising_the_same_model() {
        let mut tags_by_host = std::collections::HashMap::new();
        tags_by_host.insert("http://s1".to_string(), r#"{"models":[{"name":"llama3","digest":"abc"}]}"#);
        tags_by_host.insert("http://s2".to_string(), r#"{"models":[{"name":"llama3","digest":"abc"}]}"#);
        let (aggregator, servers) = setup(ScriptedProbe { tags_by_host });
        servers.add_server(healthy_server("s1")).unwrap();
        servers.add_server(healthy_server("s2")).unwrap();

        let merged = aggregator.get_aggregated_tags().await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].server_ids.len(), 2);
    }

    #[tokio::test]
    async fn no_healthy_servers_falls_back_to_a_stale_cache() {
        let mut tags_by_host = std::collections::HashMap::new();
        tags_by_host.insert("http://s1".to_string(), r#"{"models":[{"name":"llama3"}]}"#);
        let (aggregator, servers) = setup(ScriptedProbe { tags_by_host });
        servers.add_server(healthy_server("s1")).unwrap();
        let first = aggregator.get_aggregated_tags().await;
        assert_eq!(first.len(), 1);

        servers.remove_server(&ServerId::new("s1").unwrap()).unwrap();
        let second = aggregator.get_aggregated_tags().await;
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn clearing_the_cache_forces_a_fresh_fan_out() {
        let mut tags_by_host = std::collections::HashMap::new();
        tags_by_host.insert("http://s1".to_string(), r#"{"models":[{"name":"llama3"}]}"#);
        let (aggregator, servers) = setup(ScriptedProbe { tags_by_host });
        servers.add_server(healthy_server("s1")).unwrap();
        aggregator.get_aggregated_tags().await;

        aggregator.clear_tags_cache();
        let merged = aggregator.get_aggregated_tags().await;
        assert_eq!(merged.len(), 1);
    }
}

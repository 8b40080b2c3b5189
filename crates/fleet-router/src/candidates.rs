//! Candidate eligibility filtering and score-ordering for a single
//! `(model, capability)` request.

use crate::scoring::{self, ScoreInputs};
use fleet_breaker::{BreakerRegistry, Circuit, CircuitState};
use fleet_core::config::RouterConfig;
use fleet_core::{BreakerKey, Capability, ModelName};
use fleet_registry::{Server, ServerRegistry};
use std::sync::Arc;

pub struct Candidate {
    pub server: Server,
    pub score: f64,
    pub server_breaker: Arc<Circuit>,
    pub model_breaker: Arc<Circuit>,
}

fn model_available(server: &Server, model: &str, capability: Capability) -> bool {
    match capability {
        Capability::OpenAi => server.v1_models.iter().any(|m| m == model),
        Capability::Generate => {
            server.models.iter().any(|m| m == model) || server.v1_models.iter().any(|m| m == model)
        }
    }
}

fn capability_supported(server: &Server, capability: Capability) -> bool {
    match capability {
        Capability::OpenAi => server.supports_v1,
        Capability::Generate => server.supports_ollama || server.supports_v1,
    }
}

/// Builds the sorted candidate list for a request. `bypass_breaker`
/// corresponds to the caller having requested `bypassCircuitBreaker`
/// (Phase 2 of failover, or an explicit diagnostic bypass). Eligibility
/// is decided with a non-mutating breaker peek — this list is built for
/// capacity checks as often as it is for real dispatch, and only the
/// candidate actually dispatched to should consume an admission via
/// `Circuit::try_acquire`.
pub fn eligible_candidates(
    servers: &ServerRegistry,
    breakers: &BreakerRegistry,
    weights: &RouterConfig,
    model: &str,
    capability: Capability,
    bypass_breaker: bool,
) -> Vec<Candidate> {
    let model_name = match ModelName::new(model) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };

    let mut candidates: Vec<Candidate> = servers
        .get_servers()
        .into_iter()
        .filter(|s| s.is_eligible())
        .filter(|s| !s.draining && !s.maintenance)
        .filter(|s| model_available(s, model, capability))
        .filter(|s| capability_supported(s, capability))
        .filter(|s| !servers.is_in_cooldown(&s.id, model))
        .filter(|s| !servers.is_permanently_banned(&s.id, model))
        .filter(|s| servers.in_flight_count(&s.id, model) < s.max_concurrency)
        .filter_map(|s| {
            let server_breaker = breakers.get_or_create(BreakerKey::server(s.id.clone()));
            let model_breaker = breakers.get_or_create(BreakerKey::model(s.id.clone(), model_name.clone()));
            let admits = bypass_breaker || (server_breaker.would_admit() && model_breaker.would_admit());
            if !admits {
                return None;
            }
            let in_flight = servers.in_flight_count(&s.id, model);
            let score = scoring::score(
                &ScoreInputs {
                    p95_latency: s.last_response_time,
                    success_rate: 1.0 - model_breaker.stats().error_rate,
                    in_flight,
                    max_concurrency: s.max_concurrency,
                },
                weights,
            );
            Some(Candidate { server: s, score, server_breaker, model_breaker })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                servers
                    .in_flight_count(&a.server.id, model)
                    .cmp(&servers.in_flight_count(&b.server.id, model))
            })
            .then_with(|| a.server.id.cmp(&b.server.id))
    });
    candidates
}

pub fn circuit_states(server_breaker: &Circuit, model_breaker: &Circuit) -> (CircuitState, CircuitState) {
    (server_breaker.state(), model_breaker.state())
}

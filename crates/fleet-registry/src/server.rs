//! The server record and the fields the health scheduler is the sole
//! writer of.

use fleet_core::ServerId;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Server {
    pub id: ServerId,
    pub url: String,
    pub token_reference: Option<String>,
    pub max_concurrency: u32,
    pub supports_ollama: bool,
    pub supports_v1: bool,
    pub draining: bool,
    pub maintenance: bool,

    /// Observations the health scheduler refreshes every cycle; empty
    /// on the most recent failed check rather than stale from a prior
    /// success.
    pub healthy: bool,
    pub models: Vec<String>,
    pub v1_models: Vec<String>,
    pub last_response_time: Duration,
    pub loaded_models: Vec<(String, u64)>,
    pub total_vram_used: u64,
}

impl Server {
    pub fn new(id: ServerId, url: impl Into<String>, max_concurrency: u32) -> Self {
        Self {
            id,
            url: url.into(),
            token_reference: None,
            max_concurrency: max_concurrency.max(1),
            supports_ollama: true,
            supports_v1: true,
            draining: false,
            maintenance: false,
            healthy: false,
            models: Vec::new(),
            v1_models: Vec::new(),
            last_response_time: Duration::ZERO,
            loaded_models: Vec::new(),
            total_vram_used: 0,
        }
    }

    pub fn with_token_reference(mut self, reference: impl Into<String>) -> Self {
        self.token_reference = Some(reference.into());
        self
    }

    pub fn resolved_token(&self) -> Option<String> {
        self.token_reference
            .as_deref()
            .and_then(fleet_core::auth::resolve_token)
    }

    /// Usable for routing: healthy, not draining, not under maintenance.
    pub fn is_eligible(&self) -> bool {
        self.healthy && !self.draining && !self.maintenance
    }
}

/// The fields a health-check cycle refreshes on a server record. Kept
/// as a plain struct rather than taking `fleet_health::ServerHealthReport`
/// directly, so this crate does not depend on the health scheduler —
/// the orchestrator is the one component that sees both. The router can
/// also flip `healthy` to `false` directly on a permanent or threshold-
/// crossing transient failure; the next health check is what clears it.
#[derive(Debug, Clone, Default)]
pub struct HealthObservation {
    pub healthy: bool,
    pub supports_ollama: bool,
    pub supports_v1: bool,
    pub models: Vec<String>,
    pub v1_models: Vec<String>,
    pub last_response_time: Duration,
    pub loaded_models: Vec<(String, u64)>,
    pub total_vram_used: u64,
}

impl Server {
    pub fn apply_health_observation(&mut self, obs: HealthObservation) {
        self.healthy = obs.healthy;
        self.supports_ollama = obs.supports_ollama;
        self.supports_v1 = obs.supports_v1;
        self.models = obs.models;
        self.v1_models = obs.v1_models;
        self.last_response_time = obs.last_response_time;
        self.loaded_models = obs.loaded_models;
        self.total_vram_used = obs.total_vram_used;
    }
}

//! C8: the server registry composes server records with in-flight
//! accounting, cooldowns and bans, pruning all four whenever a server
//! is removed.

use crate::bans::{BanDetails, BanSet, CooldownMap};
use crate::error::RegistryError;
use crate::inflight::{InFlightGuard, InFlightTracker};
use crate::server::{HealthObservation, Server};
use fleet_breaker::BreakerRegistry;
use fleet_core::{Clock, ServerId};
use fleet_recovery::InFlightQuery;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub struct ServerRegistry {
    servers: Mutex<HashMap<ServerId, Server>>,
    in_flight: InFlightTracker,
    cooldowns: CooldownMap,
    bans: BanSet,
    transient_failures: Mutex<HashMap<ServerId, u32>>,
    breakers: Arc<BreakerRegistry>,
    clock: Arc<dyn Clock>,
    cooldown_ms: i64,
}

impl ServerRegistry {
    pub fn new(breakers: Arc<BreakerRegistry>, clock: Arc<dyn Clock>, cooldown_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            servers: Mutex::new(HashMap::new()),
            in_flight: InFlightTracker::new(),
            cooldowns: CooldownMap::new(),
            bans: BanSet::new(),
            transient_failures: Mutex::new(HashMap::new()),
            breakers,
            clock,
            cooldown_ms,
        })
    }

    pub fn add_server(&self, server: Server) -> Result<(), RegistryError> {
        let mut servers = self.servers.lock().unwrap();
        if servers.contains_key(&server.id) {
            return Err(RegistryError::AlreadyExists(server.id.to_string()));
        }
        servers.insert(server.id.clone(), server);
        Ok(())
    }

    /// Removes the server and prunes every other subsystem's entries
    /// for it: breakers (server-level and model-level), cooldowns,
    /// bans, and in-flight counters. Tag-cache invalidation is the
    /// caller's responsibility (the tags aggregator listens for this).
    pub fn remove_server(&self, id: &ServerId) -> Result<(), RegistryError> {
        let mut servers = self.servers.lock().unwrap();
        if servers.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        drop(servers);

        self.breakers.remove_by_prefix(id);
        self.cooldowns.remove_server(id);
        self.bans.unban_server(id);
        self.in_flight.remove_server(id);
        self.transient_failures.lock().unwrap().remove(id);
        Ok(())
    }

    pub fn update_server(&self, id: &ServerId, max_concurrency: Option<u32>) -> Result<(), RegistryError> {
        let mut servers = self.servers.lock().unwrap();
        let server = servers.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if let Some(max_concurrency) = max_concurrency {
            server.max_concurrency = max_concurrency.max(1);
        }
        Ok(())
    }

    pub fn record_health_observation(&self, id: &ServerId, observation: HealthObservation) -> Result<(), RegistryError> {
        let mut servers = self.servers.lock().unwrap();
        let server = servers.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        server.apply_health_observation(observation);
        Ok(())
    }

    pub fn set_draining(&self, id: &ServerId, draining: bool) -> Result<(), RegistryError> {
        let mut servers = self.servers.lock().unwrap();
        let server = servers.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        server.draining = draining;
        Ok(())
    }

    /// Marks a server unhealthy outside the regular health-check cycle,
    /// for the router's permanent- and threshold-crossing-transient-
    /// failure paths. The next successful health check clears it again.
    pub fn mark_unhealthy(&self, id: &ServerId) -> Result<(), RegistryError> {
        let mut servers = self.servers.lock().unwrap();
        let server = servers.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        server.healthy = false;
        Ok(())
    }

    /// Increments the server's transient-failure counter and reports
    /// whether it has just reached `threshold`. The router marks the
    /// server unhealthy itself when this returns `true`.
    pub fn record_transient_failure(&self, server: &ServerId, threshold: u32) -> bool {
        let mut counts = self.transient_failures.lock().unwrap();
        let count = counts.entry(server.clone()).or_insert(0);
        *count += 1;
        *count >= threshold
    }

    /// Clears a server's transient-failure tally, e.g. after a success.
    pub fn reset_transient_failures(&self, server: &ServerId) {
        self.transient_failures.lock().unwrap().remove(server);
    }

    pub fn get_server(&self, id: &ServerId) -> Option<Server> {
        self.servers.lock().unwrap().get(id).cloned()
    }

    pub fn get_servers(&self) -> Vec<Server> {
        self.servers.lock().unwrap().values().cloned().collect()
    }

    /// `model -> [serverId...]`, only counting currently-healthy servers.
    pub fn get_model_map(&self) -> HashMap<String, Vec<ServerId>> {
        let mut map: HashMap<String, Vec<ServerId>> = HashMap::new();
        for server in self.servers.lock().unwrap().values() {
            if !server.is_eligible() {
                continue;
            }
            for model in server.models.iter().chain(server.v1_models.iter()) {
                map.entry(model.clone()).or_default().push(server.id.clone());
            }
        }
        map
    }

    /// Every distinct model advertised by a healthy server.
    pub fn get_all_models(&self) -> Vec<String> {
        let mut set: HashSet<String> = HashSet::new();
        for server in self.servers.lock().unwrap().values() {
            if !server.is_eligible() {
                continue;
            }
            set.extend(server.models.iter().cloned());
            set.extend(server.v1_models.iter().cloned());
        }
        let mut models: Vec<String> = set.into_iter().collect();
        models.sort();
        models
    }

    /// The union across every server regardless of health, used to
    /// surface a "models we know about" list even during an outage.
    pub fn get_current_model_list(&self) -> Vec<String> {
        let mut set: HashSet<String> = HashSet::new();
        for server in self.servers.lock().unwrap().values() {
            set.extend(server.models.iter().cloned());
            set.extend(server.v1_models.iter().cloned());
        }
        let mut models: Vec<String> = set.into_iter().collect();
        models.sort();
        models
    }

    pub fn acquire_in_flight(&self, server: &ServerId, model: &str, bypass: bool) -> InFlightGuard {
        self.in_flight.acquire(server, model, bypass)
    }

    pub fn in_flight_count(&self, server: &ServerId, model: &str) -> u32 {
        self.in_flight.count(server, model)
    }

    pub fn total_in_flight(&self, server: &ServerId) -> u32 {
        self.in_flight.total_for_server(server)
    }

    pub fn mark_failure(&self, server: &ServerId, model: &str) {
        self.cooldowns.mark_failure(self.clock.as_ref(), server, model, self.cooldown_ms);
    }

    pub fn is_in_cooldown(&self, server: &ServerId, model: &str) -> bool {
        self.cooldowns.is_in_cooldown(self.clock.as_ref(), server, model)
    }

    pub fn ban(&self, server: &ServerId, model: &str, reason: Option<String>) {
        self.bans.ban(server, model, reason);
    }

    pub fn is_permanently_banned(&self, server: &ServerId, model: &str) -> bool {
        self.bans.is_banned(server, model)
    }

    pub fn unban(&self, server: &ServerId, model: &str) {
        self.bans.unban(server, model);
    }

    pub fn unban_server(&self, server: &ServerId) {
        self.bans.unban_server(server);
    }

    pub fn unban_model(&self, model: &str) {
        self.bans.unban_model(model);
    }

    pub fn clear_all_bans(&self) {
        self.bans.clear_all();
    }

    pub fn get_ban_details(&self) -> Vec<BanDetails> {
        self.bans.get_details()
    }

    pub fn load_bans(&self, entries: HashSet<(ServerId, String)>) {
        self.bans.load(entries);
    }
}

/// Lets `fleet-recovery`'s coordinator honor `checkInFlightRequests`
/// without depending on this crate's concrete type at compile time.
impl InFlightQuery for ServerRegistry {
    fn in_flight(&self, server: &ServerId) -> usize {
        self.total_in_flight(server) as usize
    }
}

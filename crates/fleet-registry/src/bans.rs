//! Cooldown map and permanent ban set, both keyed by `(server, model)`.

use fleet_core::{Clock, ServerId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

type Key = (ServerId, String);

#[derive(Debug, Clone, serde::Serialize)]
pub struct BanDetails {
    pub server: String,
    pub model: String,
    pub reason: Option<String>,
}

#[derive(Default)]
pub struct CooldownMap {
    until_ms: Mutex<HashMap<Key, i64>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_failure(&self, clock: &dyn Clock, server: &ServerId, model: &str, cooldown_ms: i64) {
        let until = clock.now_ms() + cooldown_ms;
        self.until_ms.lock().unwrap().insert((server.clone(), model.to_string()), until);
    }

    pub fn is_in_cooldown(&self, clock: &dyn Clock, server: &ServerId, model: &str) -> bool {
        let map = self.until_ms.lock().unwrap();
        match map.get(&(server.clone(), model.to_string())) {
            Some(until) => clock.now_ms() < *until,
            None => false,
        }
    }

    pub fn remove_server(&self, server: &ServerId) {
        self.until_ms.lock().unwrap().retain(|(sid, _), _| sid != server);
    }
}

#[derive(Default)]
pub struct BanSet {
    bans: Mutex<HashMap<Key, Option<String>>>,
}

impl BanSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&self, server: &ServerId, model: &str, reason: Option<String>) {
        self.bans.lock().unwrap().insert((server.clone(), model.to_string()), reason);
    }

    pub fn is_banned(&self, server: &ServerId, model: &str) -> bool {
        self.bans.lock().unwrap().contains_key(&(server.clone(), model.to_string()))
    }

    pub fn unban(&self, server: &ServerId, model: &str) {
        self.bans.lock().unwrap().remove(&(server.clone(), model.to_string()));
    }

    pub fn unban_server(&self, server: &ServerId) {
        self.bans.lock().unwrap().retain(|(sid, _), _| sid != server);
    }

    pub fn unban_model(&self, model: &str) {
        self.bans.lock().unwrap().retain(|(_, m), _| m != model);
    }

    pub fn clear_all(&self) {
        self.bans.lock().unwrap().clear();
    }

    pub fn get_details(&self) -> Vec<BanDetails> {
        self.bans
            .lock()
            .unwrap()
            .iter()
            .map(|((sid, model), reason)| BanDetails {
                server: sid.to_string(),
                model: model.clone(),
                reason: reason.clone(),
            })
            .collect()
    }

    /// Restores a persisted ban set wholesale, e.g. on startup.
    pub fn load(&self, entries: HashSet<(ServerId, String)>) {
        let mut bans = self.bans.lock().unwrap();
        bans.clear();
        for (server, model) in entries {
            bans.insert((server, model), None);
        }
    }
}

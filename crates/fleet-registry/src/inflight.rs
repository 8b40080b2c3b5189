//! In-flight request accounting, keyed by `(server, model)`, tracking
//! regular and bypass counts separately.

use fleet_core::ServerId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counters {
    regular: AtomicU32,
    bypass: AtomicU32,
}

#[derive(Debug, Default)]
pub struct InFlightTracker {
    counters: Mutex<HashMap<(ServerId, String), Arc<Counters>>>,
}

/// Decrements its slot on drop, so a panicking or cancelled request path
/// can never leak an in-flight count.
pub struct InFlightGuard {
    counters: Arc<Counters>,
    bypass: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let field = if self.bypass { &self.counters.bypass } else { &self.counters.regular };
        field.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters_for(&self, server: &ServerId, model: &str) -> Arc<Counters> {
        let mut map = self.counters.lock().unwrap();
        map.entry((server.clone(), model.to_string()))
            .or_insert_with(|| Arc::new(Counters::default()))
            .clone()
    }

    /// Increments the slot and returns an RAII guard that decrements it
    /// on drop.
    pub fn acquire(&self, server: &ServerId, model: &str, bypass: bool) -> InFlightGuard {
        let counters = self.counters_for(server, model);
        let field = if bypass { &counters.bypass } else { &counters.regular };
        field.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { counters, bypass }
    }

    pub fn count(&self, server: &ServerId, model: &str) -> u32 {
        let map = self.counters.lock().unwrap();
        map.get(&(server.clone(), model.to_string()))
            .map(|c| c.regular.load(Ordering::SeqCst) + c.bypass.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Sum across every model on this server.
    pub fn total_for_server(&self, server: &ServerId) -> u32 {
        let map = self.counters.lock().unwrap();
        map.iter()
            .filter(|((sid, _), _)| sid == server)
            .map(|(_, c)| c.regular.load(Ordering::SeqCst) + c.bypass.load(Ordering::SeqCst))
            .sum()
    }

    /// Drops every counter belonging to `server`, called when the
    /// server is removed from the registry.
    pub fn remove_server(&self, server: &ServerId) {
        self.counters.lock().unwrap().retain(|(sid, _), _| sid != server);
    }
}

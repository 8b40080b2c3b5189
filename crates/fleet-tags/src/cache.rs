//! A single cache entry protected by a dirty flag, as described for the
//! aggregated-tags read path: a fresh hit skips the fan-out entirely, a
//! stale entry is still returned rather than failing outright if every
//! server comes back empty-handed.

use crate::model::MergedModelEntry;
use std::sync::Mutex;

struct State {
    entries: Vec<MergedModelEntry>,
    timestamp_ms: i64,
    dirty: bool,
}

pub struct TagsCache {
    state: Mutex<State>,
}

impl TagsCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { entries: Vec::new(), timestamp_ms: 0, dirty: true }),
        }
    }

    /// Returns the cached entries if `now_ms - timestamp < ttl_ms` and
    /// the cache has not been explicitly marked dirty.
    pub fn get_fresh(&self, now_ms: i64, ttl_ms: i64) -> Option<Vec<MergedModelEntry>> {
        let state = self.state.lock().unwrap();
        if state.dirty || state.entries.is_empty() {
            return None;
        }
        if now_ms - state.timestamp_ms < ttl_ms {
            Some(state.entries.clone())
        } else {
            None
        }
    }

    /// The last successfully populated snapshot regardless of age,
    /// returned when a fan-out comes back empty.
    pub fn get_stale(&self) -> Option<Vec<MergedModelEntry>> {
        let state = self.state.lock().unwrap();
        if state.entries.is_empty() { None } else { Some(state.entries.clone()) }
    }

    pub fn store(&self, entries: Vec<MergedModelEntry>, now_ms: i64) {
        let mut state = self.state.lock().unwrap();
        state.entries = entries;
        state.timestamp_ms = now_ms;
        state.dirty = false;
    }

    /// Server add/remove/update, an explicit clear, or any previously
    /// unhealthy server becoming healthy all force the next read to
    /// re-fan-out rather than serve the stale snapshot.
    pub fn invalidate(&self) {
        self.state.lock().unwrap().dirty = true;
    }
}

impl Default for TagsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::ServerId;

    fn entry() -> MergedModelEntry {
        MergedModelEntry { name: "llama3".into(), digest: None, server_ids: vec![ServerId::new("s1").unwrap()] }
    }

    #[test]
    fn fresh_within_ttl_returns_the_cached_snapshot() {
        let cache = TagsCache::new();
        cache.store(vec![entry()], 1_000);
        assert!(cache.get_fresh(1_500, 1_000).is_some());
    }

    #[test]
    fn expired_past_ttl_returns_none() {
        let cache = TagsCache::new();
        cache.store(vec![entry()], 1_000);
        assert!(cache.get_fresh(5_000, 1_000).is_none());
    }

    #[test]
    fn invalidate_forces_a_miss_even_within_ttl() {
        let cache = TagsCache::new();
        cache.store(vec![entry()], 1_000);
        cache.invalidate();
        assert!(cache.get_fresh(1_100, 1_000).is_none());
        assert!(cache.get_stale().is_some());
    }

    #[test]
    fn an_empty_cache_has_no_stale_fallback() {
        let cache = TagsCache::new();
        assert!(cache.get_stale().is_none());
    }
}

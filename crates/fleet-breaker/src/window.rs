//! C1: a time-bounded success/failure record keyed by error kind.
//!
//! A breaker owns exactly one window and serializes access to it (the
//! window itself performs no locking); entries older than the
//! configured duration are elided on every read or write.

use fleet_core::ErrorKind;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
struct Entry {
    at_ms: i64,
    success: bool,
    kind: Option<ErrorKind>,
}

#[derive(Debug)]
pub struct SlidingWindow {
    capacity: usize,
    duration_ms: i64,
    entries: VecDeque<Entry>,
}

impl SlidingWindow {
    pub fn new(capacity: usize, duration_ms: i64) -> Self {
        Self {
            capacity,
            duration_ms,
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.duration_ms;
        while let Some(front) = self.entries.front() {
            if front.at_ms < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn add(&mut self, now_ms: i64, success: bool, kind: Option<ErrorKind>) {
        self.prune(now_ms);
        self.entries.push_back(Entry {
            at_ms: now_ms,
            success,
            kind,
        });
    }

    /// Fraction of window entries that were failures, in `[0, 1]`.
    /// Returns `0.0` when the window is empty.
    pub fn error_rate(&mut self, now_ms: i64) -> f64 {
        self.prune(now_ms);
        if self.entries.is_empty() {
            return 0.0;
        }
        let failures = self.entries.iter().filter(|e| !e.success).count();
        failures as f64 / self.entries.len() as f64
    }

    pub fn error_counts_by_kind(&mut self, now_ms: i64) -> HashMap<ErrorKind, u32> {
        self.prune(now_ms);
        self.error_counts_by_kind_snapshot()
    }

    /// Same tally as [`Self::error_counts_by_kind`] but without pruning
    /// first, for read-only callers (stats snapshots taken for
    /// persistence) that don't have a clock handy.
    pub fn error_counts_by_kind_snapshot(&self) -> HashMap<ErrorKind, u32> {
        let mut counts = HashMap::new();
        for entry in &self.entries {
            if let Some(kind) = entry.kind {
                *counts.entry(kind).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn total(&mut self, now_ms: i64) -> usize {
        self.prune(now_ms);
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

//! The rolling probe-metrics tuple the coordinator records on every run,
//! capped in length and pruned by age so long-running fleets don't
//! accumulate history forever.

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProbeMetric {
    pub breaker_name: String,
    pub start_ms: i64,
    pub duration: Duration,
    pub success: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub error: Option<String>,
}

const MAX_AGE_MS: i64 = 24 * 3_600 * 1_000;

pub struct RollingMetrics {
    capacity: usize,
    entries: VecDeque<ProbeMetric>,
}

impl RollingMetrics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    pub fn record(&mut self, now_ms: i64, metric: ProbeMetric) {
        self.prune(now_ms);
        self.entries.push_back(metric);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - MAX_AGE_MS;
        while let Some(front) = self.entries.front() {
            if front.start_ms < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&mut self, now_ms: i64) -> Vec<ProbeMetric> {
        self.prune(now_ms);
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! A pending request waiting for a server slot.

use fleet_core::{Capability, EndpointKind};

/// What happens to a queued item once the queue is done with it: either
/// handed back to its submitter to run, or rejected with a reason.
#[derive(Debug)]
pub enum QueueOutcome<P> {
    Ready(P),
    Rejected(crate::error::QueueError),
}

/// One pending request. `payload` is opaque to the queue; `resolver`,
/// when present, is how the submitter is woken up once the item is
/// dequeued, evicted, or the queue is cleared.
pub struct QueueItem<P> {
    pub id: u64,
    pub model: String,
    pub priority: u32,
    pub enqueue_time_ms: i64,
    /// Zero means "no deadline".
    pub deadline_ms: i64,
    pub endpoint_kind: EndpointKind,
    pub capability: Capability,
    pub client_id: Option<String>,
    pub payload: P,
    pub resolver: Option<tokio::sync::oneshot::Sender<QueueOutcome<P>>>,
}

impl<P> QueueItem<P> {
    pub fn has_deadline(&self) -> bool {
        self.deadline_ms > 0
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.has_deadline() && now_ms > self.deadline_ms
    }

    pub fn wait_time_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.enqueue_time_ms).max(0)
    }

    /// Resolves the item, dropping the payload if there is no resolver
    /// (a caller that enqueued without one only wants queue membership,
    /// not a completion signal).
    pub fn resolve(mut self, outcome: QueueOutcome<P>) {
        if let Some(resolver) = self.resolver.take() {
            let _ = resolver.send(outcome);
        }
    }
}

/// A read-only projection of a queued item for `getAllItems`/stats
/// surfaces, without exposing the opaque payload or the resolver.
#[derive(Debug, Clone)]
pub struct QueueItemView {
    pub id: u64,
    pub model: String,
    pub priority: u32,
    pub wait_time_ms: i64,
    pub has_deadline: bool,
    pub endpoint_kind: EndpointKind,
    pub capability: Capability,
    pub client_id: Option<String>,
}

impl<P> QueueItem<P> {
    pub fn to_view(&self, now_ms: i64) -> QueueItemView {
        QueueItemView {
            id: self.id,
            model: self.model.clone(),
            priority: self.priority,
            wait_time_ms: self.wait_time_ms(now_ms),
            has_deadline: self.has_deadline(),
            endpoint_kind: self.endpoint_kind,
            capability: self.capability,
            client_id: self.client_id.clone(),
        }
    }
}

/// Heap ordering: priority descending, then enqueue time ascending
/// (earlier arrivals outrank later ones at equal priority), then id
/// ascending as a final tiebreak so ordering is a total order even if
/// two items share both priority and millisecond-resolution timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapKey {
    pub priority: u32,
    pub enqueue_time_ms: i64,
    pub id: u64,
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueue_time_ms.cmp(&self.enqueue_time_ms))
            .then_with(|| other.id.cmp(&self.id))
    }
}

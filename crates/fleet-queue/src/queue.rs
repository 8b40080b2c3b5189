//! C7: a priority queue of pending requests with starvation avoidance
//! and deadline eviction, backed by `std::collections::BinaryHeap`.

use crate::error::QueueError;
use crate::item::{HeapKey, QueueItem, QueueItemView, QueueOutcome};
use fleet_core::config::QueueConfig;
use fleet_core::Clock;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub paused: bool,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub expired_total: u64,
    pub rejected_total: u64,
}

struct Entry<P> {
    key: HeapKey,
    item: QueueItem<P>,
}

impl<P> PartialEq for Entry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<P> Eq for Entry<P> {}
impl<P> PartialOrd for Entry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<P> Ord for Entry<P> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

struct State<P> {
    heap: BinaryHeap<Entry<P>>,
    config: QueueConfig,
    stats: QueueStats,
}

/// A max-heap priority queue keyed by `(priority desc, enqueueTime asc)`.
/// `pause`/`resume` gate `enqueue` only; items already admitted still
/// dequeue normally while paused.
pub struct PriorityQueue<P> {
    state: Mutex<State<P>>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    paused: AtomicBool,
}

impl<P> PriorityQueue<P> {
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                config,
                stats: QueueStats::default(),
            }),
            clock,
            next_id: AtomicU64::new(1),
            paused: AtomicBool::new(false),
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.state.lock().unwrap().stats.paused = true;
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.state.lock().unwrap().stats.paused = false;
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        QueueStats {
            size: state.heap.len(),
            ..state.stats.clone()
        }
    }

    pub fn update_config(&self, patch: impl FnOnce(&mut QueueConfig)) {
        patch(&mut self.state.lock().unwrap().config);
    }

    /// Admits an item, building its heap key from the current clock and
    /// an internally assigned monotonic id.
    pub fn enqueue(&self, mut item: QueueItem<P>) -> Result<u64, QueueError> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(QueueError::Paused);
        }
        let mut state = self.state.lock().unwrap();
        if state.heap.len() >= state.config.max_size {
            return Err(QueueError::Full(state.config.max_size));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        item.id = id;
        item.enqueue_time_ms = self.clock.now_ms();
        item.priority = item.priority.min(state.config.max_priority);

        let key = HeapKey {
            priority: item.priority,
            enqueue_time_ms: item.enqueue_time_ms,
            id,
        };
        state.heap.push(Entry { key, item });
        state.stats.enqueued_total += 1;
        Ok(id)
    }

    /// Pops expired items (resolving them with a deadline error) until
    /// the next live candidate is found, then returns it. Does not
    /// consult `paused` — draining a paused queue is still allowed.
    pub fn dequeue(&self) -> Option<QueueItem<P>> {
        let mut state = self.state.lock().unwrap();
        let now_ms = self.clock.now_ms();
        loop {
            let entry = state.heap.pop()?;
            if entry.item.is_expired(now_ms) {
                state.stats.expired_total += 1;
                entry.item.resolve(QueueOutcome::Rejected(QueueError::DeadlineExceeded));
                continue;
            }
            state.stats.dequeued_total += 1;
            return Some(entry.item);
        }
    }

    pub fn peek(&self) -> Option<QueueItemView> {
        let state = self.state.lock().unwrap();
        let now_ms = self.clock.now_ms();
        state.heap.peek().map(|e| e.item.to_view(now_ms))
    }

    pub fn get_all_items(&self) -> Vec<QueueItemView> {
        let state = self.state.lock().unwrap();
        let now_ms = self.clock.now_ms();
        state.heap.iter().map(|e| e.item.to_view(now_ms)).collect()
    }

    pub fn get_requests_by_model(&self, model: &str) -> Vec<QueueItemView> {
        self.get_all_items().into_iter().filter(|v| v.model == model).collect()
    }

    /// Rejects every pending item with `Cleared` and empties the queue.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let count = state.heap.len();
        for entry in state.heap.drain() {
            entry.item.resolve(QueueOutcome::Rejected(QueueError::Cleared));
        }
        state.stats.rejected_total += count as u64;
    }

    /// Boosts the priority of every item whose wait has exceeded
    /// `priorityBoostInterval`, capped at `maxPriority`, then rebuilds
    /// the heap. Holds the queue's single mutex for the whole rebuild so
    /// a concurrent `dequeue` is excluded rather than interleaved with a
    /// partially-reordered heap.
    pub fn boost_starved_items(&self) {
        let mut state = self.state.lock().unwrap();
        let now_ms = self.clock.now_ms();
        let interval_ms = state.config.priority_boost_interval.as_millis() as i64;
        let boost = state.config.priority_boost_amount;
        let max_priority = state.config.max_priority;

        let old_heap = std::mem::take(&mut state.heap);
        let rebuilt: Vec<Entry<P>> = old_heap
            .into_vec()
            .into_iter()
            .map(|mut entry| {
                if entry.item.wait_time_ms(now_ms) > interval_ms {
                    entry.item.priority = (entry.item.priority + boost).min(max_priority);
                    entry.key.priority = entry.item.priority;
                }
                entry
            })
            .collect();
        // `BinaryHeap::from` runs Floyd's O(n) bottom-up heapify.
        state.heap = BinaryHeap::from(rebuilt);
    }
}

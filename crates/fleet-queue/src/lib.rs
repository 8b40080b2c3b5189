//! A priority queue of pending requests, keyed by `(priority desc,
//! enqueueTime asc)`, with deadline eviction and starvation avoidance.
//!
//! [`PriorityQueue`] is the data structure; a caller owns driving
//! [`PriorityQueue::boost_starved_items`] off a timer (the orchestrator
//! does this, since only it knows the process-wide shutdown sequence).

pub mod error;
pub mod item;
pub mod queue;

pub use error::QueueError;
pub use fleet_core::config::QueueConfig;
pub use item::{QueueItem, QueueItemView, QueueOutcome};
pub use queue::{PriorityQueue, QueueStats};

//! Per-(server, model) circuit breaking.
//!
//! Four cooperating pieces: a bounded [`window::SlidingWindow`] of
//! recent outcomes, a [`classifier::FailureClassifier`] that turns an
//! upstream failure into a kind and a should-break flag, the
//! [`circuit::Circuit`] state machine itself, and a
//! [`registry::BreakerRegistry`] that looks circuits up by
//! [`fleet_core::BreakerKey`] and persists their state on a debounced
//! schedule.

pub mod circuit;
pub mod classifier;
pub mod error;
pub mod events;
pub mod registry;
pub mod window;

pub use circuit::{Circuit, CircuitConfig, CircuitState, CircuitStats};
pub use classifier::{ClassifierPatterns, DefaultClassifier, FailureClassifier, FnClassifier, UpstreamFailure};
pub use error::BreakerError;
pub use events::BreakerStateTransition;
pub use registry::BreakerRegistry;
pub use window::SlidingWindow;

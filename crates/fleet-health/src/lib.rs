//! Periodic health probing and progressive active-test backoff.
//!
//! [`scheduler::HealthScheduler`] drives two independent timers over
//! every known server: a main cycle that decides `healthy`/`unhealthy`
//! via [`probe::check_server`], and a faster recovery cycle that gives
//! half-open models a chance to be retested sooner. [`active_test`]
//! holds the progressive backoff tables and adaptive timeout math used
//! once a model enters active testing; [`retry`] is the short
//! retryable-pattern set used when the health probe call itself fails.

pub mod active_test;
pub mod error;
pub mod probe;
pub mod retry;
pub mod scheduler;

pub use active_test::{ActiveTestErrorCategory, AttemptErrorTag};
pub use error::HealthError;
pub use probe::{LoadedModel, ServerHealthReport};
pub use scheduler::{ActiveTestRunner, HealthObserver, HealthScheduler, NoActiveTests, NoHealthObserver, ServerEndpoint, ServerSource};

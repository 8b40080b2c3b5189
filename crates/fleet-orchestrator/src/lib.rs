//! C11: composes every other crate behind one lifecycle (construct,
//! initialize, serve, drain, shutdown) and is the only module graph that
//! is allowed to know every sibling crate's concrete types.

pub mod error;
pub mod orchestrator;
pub mod queue_admission;
pub mod wiring;

pub use error::OrchestratorError;
pub use orchestrator::FleetOrchestrator;
pub use queue_admission::{Admission, QueueAdmission};

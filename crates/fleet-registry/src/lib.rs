//! Server records, in-flight request accounting, cooldowns and
//! permanent bans — the registry every other component consults to
//! know what servers exist and whether they're currently usable.

pub mod bans;
pub mod error;
pub mod inflight;
pub mod registry;
pub mod server;

pub use bans::BanDetails;
pub use error::RegistryError;
pub use inflight::InFlightGuard;
pub use registry::ServerRegistry;
pub use server::{HealthObservation, Server};

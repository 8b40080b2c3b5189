//! Breaker-crate specific errors, composed into [`fleet_core::FleetError`]
//! by callers that need the unified type.

#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    #[error("invalid breaker key: {0}")]
    InvalidKey(#[from] fleet_core::InvalidId),

    #[error("persistence failed: {0}")]
    Persistence(#[from] fleet_core::PersistenceError),

    #[error("failed to (de)serialize breaker snapshot: {0}")]
    Serde(#[from] serde_json::Error),
}

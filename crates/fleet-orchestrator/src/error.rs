#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Registry(#[from] fleet_registry::RegistryError),

    #[error(transparent)]
    Breaker(#[from] fleet_breaker::BreakerError),

    #[error(transparent)]
    Router(#[from] fleet_router::RouterError),

    #[error(transparent)]
    Queue(#[from] fleet_queue::QueueError),

    #[error("recovery coordinator rejected the request: {0}")]
    Recovery(#[from] fleet_recovery::RecoveryError),

    #[error("breaker {0} not found")]
    BreakerNotFound(String),

    #[error(transparent)]
    InvalidId(#[from] fleet_core::InvalidId),

    #[error("shutdown timed out waiting for in-flight requests to drain")]
    DrainTimedOut,
}

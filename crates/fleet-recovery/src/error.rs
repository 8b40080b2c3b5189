#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("no test queued or running for {0}")]
    NotFound(String),

    #[error("server test queue for {0} is full")]
    QueueFull(String),

    #[error(transparent)]
    Probe(#[from] fleet_core::ProbeError),
}

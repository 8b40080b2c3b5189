#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error(transparent)]
    Probe(#[from] fleet_core::ProbeError),

    #[error("server {0} not found")]
    ServerNotFound(String),
}

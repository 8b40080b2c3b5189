#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("server {0} already exists")]
    AlreadyExists(String),

    #[error("server {0} not found")]
    NotFound(String),

    #[error(transparent)]
    InvalidId(#[from] fleet_core::InvalidId),
}

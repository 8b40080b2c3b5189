#[derive(Debug, thiserror::Error)]
pub enum TagsError {
    #[error(transparent)]
    InvalidId(#[from] fleet_core::InvalidId),
}

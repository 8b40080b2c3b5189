use fleet_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Every candidate was tried (or there were none); lists each
    /// attempted server and the final error kind it failed with.
    #[error("no server could serve the request; attempts: {0:?}")]
    Exhausted(Vec<(String, ErrorKind)>),

    #[error("server {0} not found")]
    ServerNotFound(String),

    #[error("server {0} is not eligible to serve model {1}")]
    NotEligible(String, String),
}

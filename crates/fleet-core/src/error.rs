//! Unified error handling.
//!
//! The core produces a small, closed set of *local* errors (never
//! retried, surfaced to the caller immediately) alongside errors
//! classified from upstream failures (see [`crate::kind::ErrorKind`]).
//! [`FleetError`] composes the two the way the orchestrator facade needs
//! to, without forcing every intermediate crate to define its own
//! `From` impl chain — the same problem the teacher corpus solves with
//! a single unified resilience error wrapping per-pattern variants.

use crate::kind::ErrorKind;
use std::time::Duration;

/// Errors the core produces itself, independent of any upstream
/// response. These never get retried by the router; they are surfaced
/// to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalError {
    #[error("queue is full")]
    QueueFull,

    #[error("queue is paused")]
    QueuePaused,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("no healthy servers available for this request")]
    NoHealthyServers,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("{0} is permanently banned")]
    PermanentlyBanned(String),

    #[error("{0} is in cooldown for another {1:?}")]
    Cooldown(String, Duration),

    #[error("request aborted")]
    Aborted,
}

impl LocalError {
    /// The HTTP status code a consumer's HTTP layer should map this
    /// error to, plus whether a `Retry-After` hint is meaningful.
    pub fn status_hint(&self) -> (u16, bool) {
        match self {
            LocalError::CircuitOpen(_)
            | LocalError::Cooldown(_, _)
            | LocalError::PermanentlyBanned(_)
            | LocalError::NoHealthyServers => (503, true),
            LocalError::ModelNotFound(_) => (404, false),
            LocalError::ServerNotFound(_) => (404, false),
            LocalError::QueueFull | LocalError::QueuePaused => (503, false),
            LocalError::DeadlineExceeded => (504, false),
            LocalError::Aborted => (499, false),
        }
    }
}

/// An upstream failure, classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream error ({kind}): {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

/// The error type every core crate composes into, and the type the
/// orchestrator facade ultimately returns to its caller.
///
/// `E` is the application-specific error an injected collaborator (the
/// HTTP probe, the persistence store) may produce; it is wrapped
/// opaquely rather than inspected by the core.
#[derive(Debug, thiserror::Error)]
pub enum FleetError<E> {
    #[error(transparent)]
    Local(#[from] LocalError),

    #[error(transparent)]
    Upstream(#[from] ClassifiedError),

    #[error("collaborator error: {0}")]
    Application(E),
}

impl<E> FleetError<E> {
    pub fn is_local(&self) -> bool {
        matches!(self, FleetError::Local(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FleetError::Local(LocalError::CircuitOpen(_)))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            FleetError::Upstream(c) => Some(c.kind),
            _ => None,
        }
    }

    pub fn into_application(self) -> Option<E> {
        match self {
            FleetError::Application(e) => Some(e),
            _ => None,
        }
    }

    pub fn application(err: E) -> Self {
        FleetError::Application(err)
    }
}

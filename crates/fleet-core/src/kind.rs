//! The canonical error classification shared by the breaker, router,
//! health scheduler and recovery coordinator.

use std::fmt;

/// The result of classifying an upstream failure.
///
/// Ordering of variants has no significance; classification always goes
/// through the classifier's fixed rule order, never through `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Retryable,
    NonRetryable,
    Transient,
    Permanent,
    RateLimited,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Retryable,
        ErrorKind::NonRetryable,
        ErrorKind::Transient,
        ErrorKind::Permanent,
        ErrorKind::RateLimited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::NonRetryable => "non-retryable",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::RateLimited => "rate-limited",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified upstream failure: the kind plus whether it should
/// advance circuit-breaker counters at all (capability errors count as
/// `non-retryable` but are excluded from breaking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub should_circuit_break: bool,
}

impl Classification {
    pub fn new(kind: ErrorKind, should_circuit_break: bool) -> Self {
        Self {
            kind,
            should_circuit_break,
        }
    }
}

/// The inferred purpose of a model, used to choose an appropriate
/// recovery probe and default embedding-model backoff behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelType {
    Embedding,
    Generation,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Embedding => f.write_str("embedding"),
            ModelType::Generation => f.write_str("generation"),
        }
    }
}

/// Which wire surface a request arrived on, and which capability it
/// needs a candidate server to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Generate,
    OpenAi,
}

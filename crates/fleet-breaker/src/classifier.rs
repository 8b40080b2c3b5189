//! C2: maps an upstream failure to an [`ErrorKind`] plus a
//! should-circuit-break flag.
//!
//! The classifier is pluggable the way the teacher's `FailureClassifier`
//! trait is: a [`DefaultClassifier`] implements the canonical rule
//! order below, and an [`FnClassifier`] adapts a plain closure for
//! callers who want to override the pattern sets without forking the
//! crate.

use fleet_core::kind::Classification;
use fleet_core::ErrorKind;
use std::sync::Arc;

/// An upstream failure as reported to the classifier: a message and an
/// optional HTTP-style status code.
#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    pub message: String,
    pub status: Option<u16>,
}

impl UpstreamFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn lower_message(&self) -> String {
        self.message.to_ascii_lowercase()
    }
}

/// A trait for mapping upstream failures to [`Classification`]s.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, failure: &UpstreamFailure) -> Classification;
}

/// Configurable pattern sets for [`DefaultClassifier`].
#[derive(Debug, Clone)]
pub struct ClassifierPatterns {
    pub capability: Vec<String>,
    pub non_retryable: Vec<String>,
    pub permanent: Vec<String>,
    pub rate_limited: Vec<String>,
    pub transient: Vec<String>,
}

impl Default for ClassifierPatterns {
    fn default() -> Self {
        Self {
            capability: vec![
                "does not support generate".into(),
                "does not support chat".into(),
                "unsupported operation".into(),
            ],
            non_retryable: vec![
                "authentication".into(),
                "authorization".into(),
                "not found".into(),
                "invalid".into(),
                "out of memory".into(),
                "runner process has terminated".into(),
                "fatal model server error".into(),
                "not enough ram".into(),
            ],
            permanent: vec!["disk full".into(), "server crash".into()],
            rate_limited: vec!["rate limit".into(), "too many requests".into()],
            transient: vec![
                "timeout".into(),
                "temporarily unavailable".into(),
                "service unavailable".into(),
                "gateway timeout".into(),
                "econnrefused".into(),
                "econnreset".into(),
                "etimedout".into(),
            ],
        }
    }
}

/// The canonical classifier: substring match against configured pattern
/// sets, then HTTP status buckets, in the fixed rule order from the
/// component description.
pub struct DefaultClassifier {
    patterns: ClassifierPatterns,
}

impl DefaultClassifier {
    pub fn new() -> Self {
        Self {
            patterns: ClassifierPatterns::default(),
        }
    }

    pub fn with_patterns(patterns: ClassifierPatterns) -> Self {
        Self { patterns }
    }
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, failure: &UpstreamFailure) -> Classification {
        let message = failure.lower_message();

        if any_contains(&message, &self.patterns.capability) {
            return Classification::new(ErrorKind::NonRetryable, false);
        }
        if any_contains(&message, &self.patterns.non_retryable) {
            return Classification::new(ErrorKind::NonRetryable, true);
        }
        if any_contains(&message, &self.patterns.permanent) {
            return Classification::new(ErrorKind::Permanent, true);
        }
        if failure.status == Some(429) || any_contains(&message, &self.patterns.rate_limited) {
            return Classification::new(ErrorKind::RateLimited, true);
        }
        if any_contains(&message, &self.patterns.transient) {
            return Classification::new(ErrorKind::Transient, true);
        }
        if let Some(status) = failure.status {
            if (500..600).contains(&status) && status != 429 {
                return Classification::new(ErrorKind::Retryable, true);
            }
        }
        Classification::new(ErrorKind::Retryable, true)
    }
}

fn any_contains(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

/// Adapts a plain closure to [`FailureClassifier`].
pub struct FnClassifier<F>
where
    F: Fn(&UpstreamFailure) -> Classification + Send + Sync,
{
    f: Arc<F>,
}

impl<F> FnClassifier<F>
where
    F: Fn(&UpstreamFailure) -> Classification + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F> FailureClassifier for FnClassifier<F>
where
    F: Fn(&UpstreamFailure) -> Classification + Send + Sync,
{
    fn classify(&self, failure: &UpstreamFailure) -> Classification {
        (self.f)(failure)
    }
}

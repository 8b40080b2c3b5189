//! The injected upstream-call capability.
//!
//! Nothing in this workspace opens a socket. Every component that needs
//! to reach an inference backend — the health scheduler's tags/ps/v1
//! probes, the recovery coordinator's lightweight and inference probes,
//! the tags aggregator's fan-out — does so through an `HttpProbe`
//! trait object supplied by the embedding binary. This mirrors the
//! corpus' pattern of taking a health-check capability as a trait
//! (`HealthChecker<T>`) rather than hard-wiring a transport.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A request to issue against an upstream server.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: HttpMethod,
    /// Path relative to the server's base url, e.g. `/api/tags`.
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Overall deadline for the call.
    pub timeout: Duration,
    /// For streaming responses: cancel if no bytes arrive within this
    /// window, even if the overall timeout has not elapsed.
    pub idle_timeout: Option<Duration>,
}

impl ProbeRequest {
    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
            timeout,
            idle_timeout: None,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Vec<u8>, timeout: Duration) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            headers,
            body: Some(body),
            timeout,
            idle_timeout: None,
        }
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.headers
            .insert("authorization".to_string(), format!("Bearer {token}"));
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = Some(idle);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Transport-level failure: the request never produced a classifiable
/// response. Distinct from a non-2xx [`ProbeResponse`], which the
/// classifier still gets to examine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("idle timeout: no activity for {0:?}")]
    IdleTimeout(Duration),
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset")]
    ConnectionReset,
    #[error("dns resolution failed: {0}")]
    DnsNotFound(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Other(String),
}

impl ProbeError {
    /// Matches the short retryable pattern set the health scheduler uses
    /// to decide whether to retry a failed probe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProbeError::Timeout(_)
                | ProbeError::IdleTimeout(_)
                | ProbeError::ConnectionRefused
                | ProbeError::ConnectionReset
                | ProbeError::DnsNotFound(_)
        )
    }
}

/// The capability to issue a single upstream HTTP call.
///
/// Implementations live outside this workspace (a `reqwest`-backed
/// client in production, an in-memory stub in tests).
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn call(&self, server_base_url: &str, request: ProbeRequest)
        -> Result<ProbeResponse, ProbeError>;
}

#[async_trait]
impl<F, Fut> HttpProbe for F
where
    F: Fn(&str, ProbeRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<ProbeResponse, ProbeError>> + Send,
{
    async fn call(
        &self,
        server_base_url: &str,
        request: ProbeRequest,
    ) -> Result<ProbeResponse, ProbeError> {
        (self)(server_base_url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_retryability_matches_the_documented_set() {
        assert!(ProbeError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProbeError::ConnectionRefused.is_retryable());
        assert!(!ProbeError::Cancelled.is_retryable());
        assert!(!ProbeError::Other("weird".into()).is_retryable());
    }

    #[tokio::test]
    async fn a_plain_closure_satisfies_the_trait() {
        let probe = |_base: &str, _req: ProbeRequest| async {
            Ok(ProbeResponse {
                status: 200,
                body: vec![],
                elapsed: Duration::from_millis(1),
            })
        };

        let resp = probe.call("http://x", ProbeRequest::get("/api/tags", Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(resp.is_success());
    }
}

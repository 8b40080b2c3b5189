//! The three-probe health check issued against every server on each
//! scheduler tick: a tags listing, a loaded-models ("ps") query, and a
//! `/v1/models` listing, all concurrent and independently timed out.

use fleet_core::{HttpProbe, ProbeError, ProbeRequest};
use std::time::Duration;

const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct LoadedModel {
    pub name: String,
    pub size_vram: u64,
    pub expires_at: Option<String>,
    pub digest: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServerHealthReport {
    pub healthy: bool,
    pub response_time: Duration,
    pub ollama_models: Vec<String>,
    pub v1_model_ids: Vec<String>,
    pub loaded_models: Vec<LoadedModel>,
    pub total_vram_used: u64,
    /// Best-effort capability inference: a server that answers the tags
    /// probe is assumed to support `generate`; one that answers `/v1`
    /// is assumed to support the OpenAI-compatible surface.
    pub supports_generate: bool,
    pub supports_openai: bool,
    pub tags_error: Option<String>,
}

fn auth_request(path: &str, timeout: Duration, token: Option<&str>) -> ProbeRequest {
    let request = ProbeRequest::get(path, timeout);
    match token {
        Some(t) => request.with_bearer(t),
        None => request,
    }
}

fn parse_tags(body: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Vec::new();
    };
    value["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_v1_models(body: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Vec::new();
    };
    value["data"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_loaded_models(body: &[u8]) -> Vec<LoadedModel> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Vec::new();
    };
    value["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .map(|m| LoadedModel {
                    name: m["name"].as_str().unwrap_or_default().to_string(),
                    size_vram: m["size_vram"].as_u64().unwrap_or(0),
                    expires_at: m["expires_at"].as_str().map(str::to_string),
                    digest: m["digest"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Runs the tags, loaded-models, and `/v1/models` probes concurrently.
/// The server is healthy iff the tags probe or the `/v1` probe
/// succeeded; failure of the loaded-models probe never fails the check.
pub async fn check_server(
    probe: &dyn HttpProbe,
    base_url: &str,
    token: Option<&str>,
    tags_timeout: Duration,
) -> ServerHealthReport {
    let start = std::time::Instant::now();

    let tags_call = probe.call(base_url, auth_request("/api/tags", tags_timeout, token));
    let ps_call = probe.call(base_url, auth_request("/api/ps", SHORT_TIMEOUT, token));
    let v1_call = probe.call(base_url, auth_request("/v1/models", SHORT_TIMEOUT, token));

    let (tags_result, ps_result, v1_result) = tokio::join!(tags_call, ps_call, v1_call);

    let mut report = ServerHealthReport {
        response_time: start.elapsed(),
        ..Default::default()
    };

    match tags_result {
        Ok(resp) if resp.is_success() => {
            report.ollama_models = parse_tags(&resp.body);
            report.supports_generate = true;
        }
        Ok(resp) => report.tags_error = Some(format!("status {}", resp.status)),
        Err(e) => report.tags_error = Some(e.to_string()),
    }

    if let Ok(resp) = ps_result {
        if resp.is_success() {
            report.loaded_models = parse_loaded_models(&resp.body);
            report.total_vram_used = report.loaded_models.iter().map(|m| m.size_vram).sum();
        }
    }

    if let Ok(resp) = v1_result {
        if resp.is_success() {
            report.v1_model_ids = parse_v1_models(&resp.body);
            report.supports_openai = true;
        }
    }

    report.healthy = report.supports_generate || report.supports_openai;
    report
}

pub fn is_probe_retryable(error: &ProbeError) -> bool {
    error.is_retryable() || crate::retry::is_retryable(&error.to_string())
}

//! The tags-listing probe, issued once per healthy Ollama-capable
//! server during a fan-out cycle. Deliberately separate from
//! `fleet-health`'s three-probe check: that one decides server health,
//! this one only needs the model listing and stays ignorant of the
//! scheduler.

use crate::model::ModelTag;
use fleet_core::{HttpProbe, ProbeError, ProbeRequest};
use std::time::Duration;

const TAGS_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn fetch_tags(probe: &dyn HttpProbe, base_url: &str, token: Option<&str>) -> Result<Vec<ModelTag>, ProbeError> {
    let mut request = ProbeRequest::get("/api/tags", TAGS_TIMEOUT);
    if let Some(token) = token {
        request = request.with_bearer(token);
    }
    let response = probe.call(base_url, request).await?;
    if !response.is_success() {
        return Err(ProbeError::Other(format!("status {}", response.status)));
    }
    Ok(parse_tags(&response.body))
}

fn parse_tags(body: &[u8]) -> Vec<ModelTag> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Vec::new();
    };
    value["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| {
                    let name = m["name"].as_str()?.to_string();
                    let digest = m["digest"].as_str().map(str::to_string);
                    Some(ModelTag { name, digest })
                })
                .collect()
        })
        .unwrap_or_default()
}

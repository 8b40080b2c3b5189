//! Picks the right probe shape for a breaker key and builds the
//! [`fleet_core::ProbeRequest`] for it.

use fleet_core::{BreakerKey, ModelType, ProbeRequest};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Server-level breaker: a lightweight tags listing.
    Tags,
    /// Model-level breaker, generation capability.
    Inference,
    /// Model-level breaker, embedding capability (inferred or confirmed
    /// by a capability error from an inference probe).
    Embedding,
}

impl ProbeKind {
    pub fn timeout(&self) -> Duration {
        match self {
            ProbeKind::Tags => Duration::from_secs(5),
            ProbeKind::Inference => Duration::from_secs(60),
            ProbeKind::Embedding => Duration::from_secs(15),
        }
    }
}

/// Chooses the probe a fresh test of `key` should start with.
pub fn select(key: &BreakerKey, model_type: Option<ModelType>) -> ProbeKind {
    let Some(model) = key.model_name() else {
        return ProbeKind::Tags;
    };
    if model_type == Some(ModelType::Embedding) || model.looks_like_embedding_model() {
        ProbeKind::Embedding
    } else {
        ProbeKind::Inference
    }
}

pub fn build_request(kind: ProbeKind, model: Option<&str>) -> ProbeRequest {
    match kind {
        ProbeKind::Tags => ProbeRequest::get("/api/tags", kind.timeout()),
        ProbeKind::Inference => {
            let body = serde_json::json!({
                "model": model.unwrap_or_default(),
                "prompt": "",
                "options": { "num_predict": 1, "temperature": 0.0 },
                "stream": false,
            });
            ProbeRequest::post_json(
                "/api/generate",
                serde_json::to_vec(&body).unwrap_or_default(),
                kind.timeout(),
            )
        }
        ProbeKind::Embedding => {
            let body = serde_json::json!({
                "model": model.unwrap_or_default(),
                "prompt": "ping",
            });
            ProbeRequest::post_json(
                "/api/embeddings",
                serde_json::to_vec(&body).unwrap_or_default(),
                kind.timeout(),
            )
        }
    }
}

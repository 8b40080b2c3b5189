//! Identity newtypes for servers, models and circuit breakers.

use std::fmt;

/// A server identifier: unique, at most 100 characters, `[A-Za-z0-9_-]`.
///
/// Validity is checked at construction so that once a `ServerId` exists
/// every other component can treat it as already-valid input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

/// Error returned when a candidate identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier {value:?}: {reason}")]
pub struct InvalidId {
    pub value: String,
    pub reason: &'static str,
}

impl ServerId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        crate::validate::server_id(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A model identifier of the form `name[:tag][:quant]`.
///
/// The tag `latest` is implicit: callers resolve a bare name to
/// `name:latest` via [`ModelName::with_implicit_latest`] when only the
/// tagged form is known to exist in a catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        crate::validate::model_name(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `name:latest` if `self` carries no explicit tag.
    pub fn with_implicit_latest(&self) -> ModelName {
        if self.0.contains(':') {
            self.clone()
        } else {
            ModelName(format!("{}:latest", self.0))
        }
    }

    /// True if this model's base name matches the fixed embedding-pattern
    /// list used for capability inference (see the circuit breaker's
    /// `model_type` inference).
    pub fn looks_like_embedding_model(&self) -> bool {
        const PATTERNS: &[&str] = &[
            "embed",
            "nomic-embed",
            "bge-",
            "gte-",
            "e5-",
            "all-minilm",
            "all-mpnet",
            "sentence",
            "text-embedding",
            "pygmalion",
        ];
        let lower = self.0.to_ascii_lowercase();
        PATTERNS.iter().any(|p| lower.contains(p))
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The key a circuit breaker is registered under: either a whole server
/// or a specific `(server, model)` pair.
///
/// A server-level key is the bare server id. A model-level key is
/// `serverId ":" modelName`, split on the *first* colon only — the model
/// portion may itself contain colons (tag/quant separators) and is
/// reassembled verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BreakerKey {
    Server(ServerId),
    Model(ServerId, ModelName),
}

impl BreakerKey {
    pub fn server(id: ServerId) -> Self {
        BreakerKey::Server(id)
    }

    pub fn model(id: ServerId, model: ModelName) -> Self {
        BreakerKey::Model(id, model)
    }

    pub fn server_id(&self) -> &ServerId {
        match self {
            BreakerKey::Server(id) => id,
            BreakerKey::Model(id, _) => id,
        }
    }

    pub fn model_name(&self) -> Option<&ModelName> {
        match self {
            BreakerKey::Server(_) => None,
            BreakerKey::Model(_, m) => Some(m),
        }
    }

    /// Does this key belong to the given server, either as the
    /// server-level breaker itself or one of its model-level breakers?
    pub fn belongs_to(&self, server: &ServerId) -> bool {
        self.server_id() == server
    }

    /// Parse the canonical string form (`id` or `id:model`).
    pub fn parse(raw: &str) -> Result<Self, InvalidId> {
        match raw.split_once(':') {
            None => Ok(BreakerKey::Server(ServerId::new(raw)?)),
            Some((sid, model)) => {
                Ok(BreakerKey::Model(ServerId::new(sid)?, ModelName::new(model)?))
            }
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerKey::Server(id) => write!(f, "{id}"),
            BreakerKey::Model(id, model) => write!(f, "{id}:{model}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_rejects_bad_chars() {
        assert!(ServerId::new("ok-server_1").is_ok());
        assert!(ServerId::new("bad server").is_err());
        assert!(ServerId::new("").is_err());
    }

    #[test]
    fn breaker_key_splits_on_first_colon_only() {
        let key = BreakerKey::parse("s1:llama3:8b:q4").unwrap();
        assert_eq!(key.server_id().as_str(), "s1");
        assert_eq!(key.model_name().unwrap().as_str(), "llama3:8b:q4");
        assert_eq!(key.to_string(), "s1:llama3:8b:q4");
    }

    #[test]
    fn breaker_key_server_level_has_no_model() {
        let key = BreakerKey::parse("s1").unwrap();
        assert!(key.model_name().is_none());
    }

    #[test]
    fn implicit_latest_only_applied_when_untagged() {
        let bare = ModelName::new("llama3").unwrap();
        assert_eq!(bare.with_implicit_latest().as_str(), "llama3:latest");

        let tagged = ModelName::new("llama3:8b").unwrap();
        assert_eq!(tagged.with_implicit_latest().as_str(), "llama3:8b");
    }

    #[test]
    fn embedding_pattern_match_is_case_insensitive() {
        assert!(ModelName::new("BGE-Large").unwrap().looks_like_embedding_model());
        assert!(ModelName::new("nomic-embed-text").unwrap().looks_like_embedding_model());
        assert!(!ModelName::new("llama3:8b").unwrap().looks_like_embedding_model());
    }
}

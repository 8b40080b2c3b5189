//! Layered configuration: built-in defaults, then an optional JSON file,
//! then well-known environment variable overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub base_failure_threshold: u32,
    pub min_threshold: u32,
    pub max_threshold: u32,
    pub threshold_adjustment: u32,
    pub error_rate_threshold: f64,
    pub recovery_success_threshold: u32,
    pub smoothing_alpha: f64,
    #[serde(with = "duration_ms")]
    pub open_timeout: Duration,
    pub window_capacity: usize,
    #[serde(with = "duration_secs")]
    pub window_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            base_failure_threshold: 5,
            min_threshold: 2,
            max_threshold: 20,
            threshold_adjustment: 2,
            error_rate_threshold: 0.5,
            recovery_success_threshold: 2,
            smoothing_alpha: 0.3,
            open_timeout: secs(120),
            window_capacity: 200,
            window_duration: secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub debounce: Duration,
    pub backups: u8,
    pub key: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: secs(30),
            backups: 3,
            key: "circuit-breakers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    #[serde(with = "duration_ms")]
    pub server_cooldown: Duration,
    #[serde(with = "duration_ms")]
    pub max_wait_for_in_flight: Duration,
    #[serde(with = "duration_ms")]
    pub model_test_timeout: Duration,
    pub max_queue_size_per_server: usize,
    pub max_concurrent_per_server: usize,
    pub check_in_flight_requests: bool,
    /// Optional, default-zero delay before a probe is declared complete.
    /// A product knob, not a correctness requirement (see design notes).
    #[serde(with = "duration_ms")]
    pub embedding_probe_visibility_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            server_cooldown: secs(10),
            max_wait_for_in_flight: secs(30),
            model_test_timeout: secs(60),
            max_queue_size_per_server: 10,
            max_concurrent_per_server: 2,
            check_in_flight_requests: true,
            embedding_probe_visibility_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    #[serde(with = "duration_ms")]
    pub recovery_interval: Duration,
    pub max_concurrent_checks: usize,
    pub retry_attempts: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: secs(30),
            recovery_interval: secs(15),
            max_concurrent_checks: 8,
            retry_attempts: 2,
            retry_delay: millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
    pub max_priority: u32,
    #[serde(with = "duration_ms")]
    pub priority_boost_interval: Duration,
    pub priority_boost_amount: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_priority: 10,
            priority_boost_interval: secs(30),
            priority_boost_amount: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub weight_latency: f64,
    pub weight_success_rate: f64,
    pub weight_load: f64,
    pub weight_capacity: f64,
    pub max_same_server_retries: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    pub retry_backoff_multiplier: f64,
    #[serde(with = "duration_ms")]
    pub max_retry_delay: Duration,
    pub retryable_status_codes: Vec<u16>,
    #[serde(with = "duration_ms")]
    pub cooldown_duration: Duration,
    pub unhealthy_failure_threshold: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weight_latency: 1.0,
            weight_success_rate: 1.0,
            weight_load: 0.5,
            weight_capacity: 0.5,
            max_same_server_retries: 3,
            retry_delay: millis(200),
            retry_backoff_multiplier: 2.0,
            max_retry_delay: secs(5),
            retryable_status_codes: vec![429, 503],
            cooldown_duration: secs(30),
            unhealthy_failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub fanout_batch_size: usize,
    #[serde(with = "duration_ms")]
    pub inter_batch_delay: Duration,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            ttl: secs(60),
            fanout_batch_size: 8,
            inter_batch_delay: millis(50),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub breaker: BreakerConfig,
    pub persistence: PersistenceConfig,
    pub recovery: RecoveryConfig,
    pub health: HealthConfig,
    pub queue: QueueConfig,
    pub router: RouterConfig,
    pub tags: TagsConfig,
    pub log_level: String,
    pub debug: bool,
    pub disable_file_logging: bool,
    pub max_log_entries: usize,
}

impl FleetConfig {
    /// Defaults layered with a JSON override document, itself layered
    /// with the well-known environment variables from the external
    /// interface section.
    pub fn load(file_json: Option<&str>) -> Result<Self, serde_json::Error> {
        let mut config = match file_json {
            Some(json) => serde_json::from_str(json)?,
            None => FleetConfig::default(),
        };
        config.apply_env_overlay();
        Ok(config)
    }

    pub fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var("ORCHESTRATOR_ENABLE_PERSISTENCE") {
            self.persistence.enabled = parse_bool(&v, self.persistence.enabled);
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_HEALTH_CHECK_ENABLED") {
            self.health.enabled = parse_bool(&v, self.health.enabled);
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("DEBUG") {
            self.debug = parse_bool(&v, self.debug);
        }
        if let Ok(v) = std::env::var("DISABLE_FILE_LOGGING") {
            self.disable_file_logging = parse_bool(&v, self.disable_file_logging);
        }
        if let Ok(v) = std::env::var("MAX_LOG_ENTRIES") {
            if let Ok(n) = v.parse() {
                self.max_log_entries = n;
            }
        }
    }
}

fn parse_bool(raw: &str, fallback: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            persistence: PersistenceConfig::default(),
            recovery: RecoveryConfig::default(),
            health: HealthConfig::default(),
            queue: QueueConfig::default(),
            router: RouterConfig::default(),
            tags: TagsConfig::default(),
            log_level: "info".to_string(),
            debug: false,
            disable_file_logging: false,
            max_log_entries: 10_000,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_thresholds() {
        let cfg = FleetConfig::load(None).unwrap();
        assert_eq!(cfg.breaker.base_failure_threshold, 5);
        assert_eq!(cfg.breaker.open_timeout, secs(120));
        assert_eq!(cfg.queue.max_size, 1000);
        assert_eq!(cfg.recovery.server_cooldown, secs(10));
        assert_eq!(cfg.router.retryable_status_codes, vec![429, 503]);
    }

    #[test]
    fn file_overlay_overrides_individual_fields() {
        let json = r#"{"queue": {"max_size": 50}}"#;
        let cfg = FleetConfig::load(Some(json)).unwrap();
        assert_eq!(cfg.queue.max_size, 50);
        // unspecified fields keep their defaults
        assert_eq!(cfg.breaker.base_failure_threshold, 5);
    }

    #[test]
    fn env_overlay_applies_after_file_overlay() {
        std::env::set_var("FLEET_CORE_TEST_MAX_LOG_ENTRIES_PROBE", "1");
        std::env::remove_var("FLEET_CORE_TEST_MAX_LOG_ENTRIES_PROBE");

        std::env::set_var("MAX_LOG_ENTRIES", "4242");
        let cfg = FleetConfig::load(None).unwrap();
        assert_eq!(cfg.max_log_entries, 4242);
        std::env::remove_var("MAX_LOG_ENTRIES");
    }
}

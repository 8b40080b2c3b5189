//! Progressive backoff and adaptive per-attempt timeout for active
//! tests run against half-open models after a successful health check.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTestErrorCategory {
    Capability,
    ModelFile,
    Permanent,
    Other,
}

pub fn max_attempts(category: ActiveTestErrorCategory) -> u32 {
    match category {
        ActiveTestErrorCategory::Capability => 2,
        ActiveTestErrorCategory::ModelFile => 3,
        ActiveTestErrorCategory::Permanent => 5,
        ActiveTestErrorCategory::Other => 8,
    }
}

/// The delay before the next attempt, or `None` if `consecutive_failures`
/// has already reached the category's stop limit.
pub fn backoff_after_failure(category: ActiveTestErrorCategory, consecutive_failures: u32) -> Option<Duration> {
    if consecutive_failures >= max_attempts(category) {
        return None;
    }
    let secs = match category {
        ActiveTestErrorCategory::Capability => 30,
        ActiveTestErrorCategory::ModelFile => match consecutive_failures {
            1 => 60,
            2 => 300,
            _ => 600,
        },
        ActiveTestErrorCategory::Permanent => match consecutive_failures {
            1 => 300,
            2 => 600,
            3 => 1_200,
            4 => 2_400,
            _ => 3_600,
        },
        ActiveTestErrorCategory::Other => {
            let capped = (30.0 * 2f64.powi(consecutive_failures as i32 - 1)).min(1_800.0);
            return Some(Duration::from_secs_f64(capped));
        }
    };
    Some(Duration::from_secs(secs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptErrorTag {
    Capability,
    ModelFile,
    Permanent,
    Memory,
    Timeout,
    ModelNotFound,
    ConnectionRefused,
    Other,
}

/// The adaptive per-attempt timeout: a base timeout for the error tag,
/// then scaled by model size, recent server latency, and how many times
/// this (server, model) has already failed in a row.
pub fn adaptive_timeout(
    base: Duration,
    tag: AttemptErrorTag,
    consecutive_failures: u32,
    model_size_multiplier: f64,
    server_performance_multiplier: f64,
) -> Duration {
    let raw = match tag {
        AttemptErrorTag::Capability => Duration::from_secs(5),
        AttemptErrorTag::ModelFile => Duration::from_secs(10),
        AttemptErrorTag::Permanent => Duration::from_secs(15),
        AttemptErrorTag::Memory => Duration::from_secs(10),
        AttemptErrorTag::ModelNotFound => Duration::from_secs(5),
        AttemptErrorTag::ConnectionRefused => base,
        AttemptErrorTag::Timeout | AttemptErrorTag::Other => {
            let exponent = (consecutive_failures + 1).min(10);
            let scaled_ms = base.as_millis() as f64 * 2f64.powi(exponent as i32);
            Duration::from_millis((scaled_ms as u64).min(Duration::from_secs(15 * 60).as_millis() as u64))
        }
    };

    let server_multiplier = server_performance_multiplier.clamp(0.5, 2.0);
    let progressive_extension = (1.0 + 0.25 * consecutive_failures as f64).min(3.0);
    let size_multiplier = model_size_multiplier.max(0.1);

    Duration::from_millis(
        (raw.as_millis() as f64 * size_multiplier * server_multiplier * progressive_extension) as u64,
    )
}

/// Measured VRAM bytes divided by 500MB when known; otherwise parsed
/// from a `:Nb` or `NxMb` suffix in the model name, defaulting to `1.0`.
pub fn model_size_multiplier(vram_bytes: Option<u64>, model_name: &str) -> f64 {
    const UNIT: f64 = 500.0 * 1024.0 * 1024.0;
    if let Some(bytes) = vram_bytes {
        return (bytes as f64 / UNIT).max(0.1);
    }
    parse_size_hint(model_name).unwrap_or(1.0)
}

fn parse_size_hint(model_name: &str) -> Option<f64> {
    let lower = model_name.to_ascii_lowercase();
    for segment in lower.split([':', '-', '_']) {
        let digits: String = segment.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
        if digits.is_empty() {
            continue;
        }
        let suffix = &segment[digits.len()..];
        if suffix == "b" {
            if let Ok(billions) = digits.parse::<f64>() {
                return Some((billions / 7.0).max(0.1));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_errors_stop_after_two_attempts() {
        assert_eq!(backoff_after_failure(ActiveTestErrorCategory::Capability, 1), Some(Duration::from_secs(30)));
        assert_eq!(backoff_after_failure(ActiveTestErrorCategory::Capability, 2), None);
    }

    #[test]
    fn model_file_errors_follow_the_documented_table() {
        assert_eq!(backoff_after_failure(ActiveTestErrorCategory::ModelFile, 1), Some(Duration::from_secs(60)));
        assert_eq!(backoff_after_failure(ActiveTestErrorCategory::ModelFile, 2), Some(Duration::from_secs(300)));
        assert_eq!(backoff_after_failure(ActiveTestErrorCategory::ModelFile, 3), None);
    }

    #[test]
    fn other_errors_double_and_cap_at_thirty_minutes() {
        let at_k1 = backoff_after_failure(ActiveTestErrorCategory::Other, 1).unwrap();
        let at_k2 = backoff_after_failure(ActiveTestErrorCategory::Other, 2).unwrap();
        assert!(at_k2 > at_k1);
        let at_k10 = backoff_after_failure(ActiveTestErrorCategory::Other, 7).unwrap();
        assert!(at_k10 <= Duration::from_secs(1_800));
    }

    #[test]
    fn timeout_errors_scale_with_consecutive_failures() {
        let base = Duration::from_secs(60);
        let t0 = adaptive_timeout(base, AttemptErrorTag::Timeout, 0, 1.0, 1.0);
        let t1 = adaptive_timeout(base, AttemptErrorTag::Timeout, 1, 1.0, 1.0);
        assert!(t1 > t0);
    }

    #[test]
    fn server_performance_multiplier_is_clamped() {
        let base = Duration::from_secs(10);
        let slow = adaptive_timeout(base, AttemptErrorTag::ModelNotFound, 0, 1.0, 10.0);
        let fast = adaptive_timeout(base, AttemptErrorTag::ModelNotFound, 0, 1.0, 0.0);
        assert!(slow <= Duration::from_secs(5) * 2);
        assert!(fast >= Duration::from_secs(5) / 2);
    }

    #[test]
    fn model_size_multiplier_prefers_measured_vram() {
        let measured = model_size_multiplier(Some(1_000 * 1024 * 1024), "llama3");
        assert!((measured - 2.0).abs() < 0.01);
    }

    #[test]
    fn model_size_multiplier_falls_back_to_name_hint() {
        let inferred = model_size_multiplier(None, "llama3:70b");
        assert!(inferred > 1.0);
        let default_sized = model_size_multiplier(None, "llama3");
        assert_eq!(default_sized, 1.0);
    }
}

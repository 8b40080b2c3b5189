//! The short retryable-error pattern set and exponential backoff used
//! when a health probe call itself fails (distinct from the breaker's
//! own classifier, which runs on probe *outcomes*).

use std::time::Duration;

const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "enotfound",
    "dns",
    "network",
    "temporary",
];

pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// `retryDelayMs · backoffMultiplier^attempt`, `attempt` zero-based.
pub fn backoff_delay(retry_delay: Duration, backoff_multiplier: f64, attempt: u32) -> Duration {
    let millis = retry_delay.as_millis() as f64 * backoff_multiplier.powi(attempt as i32);
    Duration::from_millis(millis.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_connection_errors_are_retryable() {
        assert!(is_retryable("Error: ETIMEDOUT"));
        assert!(is_retryable("connection refused"));
        assert!(is_retryable("DNS lookup failed"));
    }

    #[test]
    fn application_errors_are_not_retryable() {
        assert!(!is_retryable("invalid API key"));
    }

    #[test]
    fn backoff_grows_exponentially_with_attempt() {
        let d0 = backoff_delay(Duration::from_millis(500), 2.0, 0);
        let d1 = backoff_delay(Duration::from_millis(500), 2.0, 1);
        let d2 = backoff_delay(Duration::from_millis(500), 2.0, 2);
        assert_eq!(d0, Duration::from_millis(500));
        assert_eq!(d1, Duration::from_millis(1_000));
        assert_eq!(d2, Duration::from_millis(2_000));
    }
}

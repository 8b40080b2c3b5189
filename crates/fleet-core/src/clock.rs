//! The injected time source.
//!
//! Every timestamp the control plane produces (`lastFailure`,
//! `nextRetryAt`, cooldown expiry, ...) goes through a `Clock` rather
//! than `SystemTime::now()` directly, so breaker and queue tests can
//! drive time deterministically instead of sleeping in real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock a test can advance explicitly.
#[derive(Debug)]
pub struct FakeClock {
    millis: AtomicI64,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_ms(&self, value: i64) {
        self.millis.store(value, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Zero-clamped duration since an earlier timestamp, in milliseconds.
///
/// Used wherever a timestamp may legitimately be in the future relative
/// to "now" (see the half-open jitter design note): the duration since
/// it is zero, never negative.
pub fn elapsed_ms_clamped(clock: &dyn Clock, since_ms: i64) -> i64 {
    (clock.now_ms() - since_ms).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
    }

    #[test]
    fn elapsed_clamps_future_timestamps_to_zero() {
        let clock = FakeClock::new(1_000);
        assert_eq!(elapsed_ms_clamped(&clock, 5_000), 0);
        assert_eq!(elapsed_ms_clamped(&clock, 0), 1_000);
    }
}

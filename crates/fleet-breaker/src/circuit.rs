//! C3: the per-breaker state machine.
//!
//! A single [`Circuit`] guards one [`BreakerKey`] (a whole server, or a
//! `server:model` pair). State lives behind a `std::sync::Mutex`; the
//! current [`CircuitState`] is additionally mirrored in an `AtomicU8` so
//! hot-path admission checks from the router can read it without taking
//! the lock, the way the teacher's circuit breaker separates its
//! lock-free fast read from its guarded slow path.

use crate::classifier::UpstreamFailure;
use crate::window::SlidingWindow;
use fleet_core::{BreakerKey, Classification, Clock, ErrorKind, ModelType};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The breaker's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

/// Tunables for a single circuit. Cloned out of [`fleet_core::config::BreakerConfig`]
/// by the registry when a breaker is created.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub base_failure_threshold: u32,
    pub min_threshold: u32,
    pub max_threshold: u32,
    pub threshold_adjustment: u32,
    pub error_rate_threshold: f64,
    pub recovery_success_threshold: u32,
    pub smoothing_alpha: f64,
    pub open_timeout: Duration,
    pub window_capacity: usize,
    pub window_duration: Duration,
}

impl From<&fleet_core::config::BreakerConfig> for CircuitConfig {
    fn from(c: &fleet_core::config::BreakerConfig) -> Self {
        Self {
            base_failure_threshold: c.base_failure_threshold,
            min_threshold: c.min_threshold,
            max_threshold: c.max_threshold,
            threshold_adjustment: c.threshold_adjustment,
            error_rate_threshold: c.error_rate_threshold,
            recovery_success_threshold: c.recovery_success_threshold,
            smoothing_alpha: c.smoothing_alpha,
            open_timeout: c.open_timeout,
            window_capacity: c.window_capacity,
            window_duration: c.window_duration,
        }
    }
}

/// A point-in-time snapshot of a circuit's counters, safe to serialize
/// or hand to a caller.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_request_count: u64,
    pub blocked_request_count: u64,
    pub consecutive_successes: u32,
    pub half_open_attempts: u32,
    pub consecutive_failed_recoveries: u32,
    pub active_tests_in_progress: u32,
    pub last_failure_ms: Option<i64>,
    pub last_success_ms: Option<i64>,
    pub next_retry_at_ms: Option<i64>,
    pub half_open_started_at_ms: Option<i64>,
    pub last_failure_reason: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub model_type: Option<ModelType>,
    pub error_rate: f64,
    pub error_counts: std::collections::HashMap<ErrorKind, u32>,
    pub rate_limit_consecutive_failures: u32,
    pub learned_rate_limit_backoff_ms: Option<i64>,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_request_count: u64,
    blocked_request_count: u64,
    consecutive_successes: u32,
    half_open_attempts: u32,
    consecutive_failed_recoveries: u32,
    active_tests_in_progress: u32,
    ever_succeeded: bool,
    last_failure_ms: Option<i64>,
    last_success_ms: Option<i64>,
    next_retry_at_ms: Option<i64>,
    half_open_started_at_ms: Option<i64>,
    last_failure_reason: Option<String>,
    last_error_kind: Option<ErrorKind>,
    model_type: Option<ModelType>,
    error_rate: f64,
    rate_limit_consecutive_failures: u32,
    learned_rate_limit_backoff_ms: Option<i64>,
    window: SlidingWindow,
}

/// A single circuit breaker instance for one [`BreakerKey`].
pub struct Circuit {
    pub key: BreakerKey,
    config: CircuitConfig,
    state_fast: AtomicU8,
    inner: Mutex<Inner>,
}

const MIN_RATE_LIMIT_BACKOFF_MS: i64 = 5 * 60 * 1_000;
const MAX_RATE_LIMIT_BACKOFF_MS: i64 = 60 * 60 * 1_000;

fn default_model_type(key: &BreakerKey) -> Option<ModelType> {
    key.model_name().map(|m| {
        if m.looks_like_embedding_model() {
            ModelType::Embedding
        } else {
            ModelType::Generation
        }
    })
}

impl Circuit {
    pub fn new(key: BreakerKey, config: CircuitConfig) -> Self {
        let model_type = default_model_type(&key);
        let inner = Inner {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_request_count: 0,
            blocked_request_count: 0,
            consecutive_successes: 0,
            half_open_attempts: 0,
            consecutive_failed_recoveries: 0,
            active_tests_in_progress: 0,
            ever_succeeded: false,
            last_failure_ms: None,
            last_success_ms: None,
            next_retry_at_ms: None,
            half_open_started_at_ms: None,
            last_failure_reason: None,
            last_error_kind: None,
            model_type,
            error_rate: 0.0,
            rate_limit_consecutive_failures: 0,
            learned_rate_limit_backoff_ms: None,
            window: SlidingWindow::new(config.window_capacity, config.window_duration.as_millis() as i64),
        };
        Self {
            key,
            state_fast: AtomicU8::new(CircuitState::Closed.to_u8()),
            config,
            inner: Mutex::new(inner),
        }
    }

    /// Lock-free read of the current state, for hot-path admission
    /// checks that do not need the full stats snapshot.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_fast.load(Ordering::Acquire))
    }

    /// Non-mutating admission check: would a request be let through
    /// right now? Unlike `try_acquire`, this takes no lock, never
    /// increments `totalRequestCount`, and never performs the
    /// `open -> half-open` transition — a breaker never actually admits
    /// real traffic while open or half-open (recovery probes go through
    /// C5, not through this call), so "closed" is the whole answer. Use
    /// this for capacity checks over many candidates; reserve
    /// `try_acquire` for the one candidate actually being dispatched to.
    pub fn would_admit(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    fn set_state(&self, inner: &mut Inner, state: CircuitState) {
        inner.state = state;
        self.state_fast.store(state.to_u8(), Ordering::Release);
    }

    /// `true` if a request may proceed. Always increments
    /// `totalRequestCount`; increments `blockedRequestCount` when
    /// denying. Transitions `open -> half-open` in place when the
    /// timeout has elapsed and the flap guard allows it.
    pub fn try_acquire(&self, clock: &dyn Clock) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.total_request_count += 1;

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let now = clock.now_ms();
                let ready = inner.next_retry_at_ms.map(|t| now >= t).unwrap_or(false);
                if !ready {
                    inner.blocked_request_count += 1;
                    return false;
                }
                if inner.consecutive_failed_recoveries >= 5 && !inner.ever_succeeded {
                    inner.blocked_request_count += 1;
                    return false;
                }
                self.enter_half_open(&mut inner, now);
                false
            }
        }
    }

    fn enter_half_open(&self, inner: &mut Inner, now_ms: i64) {
        self.set_state(inner, CircuitState::HalfOpen);
        use rand::Rng;
        let jitter_ms = rand::rng().random_range(0..30_000);
        inner.half_open_started_at_ms = Some(now_ms + jitter_ms);
        inner.active_tests_in_progress = 0;
        inner.consecutive_successes = 0;
        inner.half_open_attempts = 0;
    }

    fn adaptive_threshold(&self, inner: &mut Inner, now_ms: i64) -> u32 {
        let total = inner.window.total(now_ms);
        if total == 0 {
            return self.config.base_failure_threshold;
        }
        let counts = inner.window.error_counts_by_kind(now_ms);
        let non_retryable = *counts.get(&ErrorKind::NonRetryable).unwrap_or(&0)
            + *counts.get(&ErrorKind::Permanent).unwrap_or(&0);
        let transient = *counts.get(&ErrorKind::Transient).unwrap_or(&0)
            + *counts.get(&ErrorKind::Retryable).unwrap_or(&0);
        let total_f = total as f64;
        let non_retryable_ratio = non_retryable as f64 / total_f;
        let transient_ratio = transient as f64 / total_f;

        if non_retryable_ratio > 0.5 {
            self.config
                .base_failure_threshold
                .saturating_sub(self.config.threshold_adjustment)
                .max(self.config.min_threshold)
        } else if transient_ratio > 0.7 {
            (self.config.base_failure_threshold + self.config.threshold_adjustment)
                .min(self.config.max_threshold)
        } else {
            self.config.base_failure_threshold
        }
    }

    /// Backoff for the *next* open transition. `k` counts consecutive
    /// rate-limit failures and only matters for `ErrorKind::RateLimited`,
    /// whose base is the learned value from the last successful recovery
    /// (falling back to the floor until one has been learned) rather than
    /// a fixed constant, so the breaker converges on whatever backoff
    /// actually worked last time.
    fn first_failure_backoff_ms(&self, kind: ErrorKind, inner: &Inner, k: u32) -> i64 {
        match kind {
            ErrorKind::NonRetryable => 48 * 3_600 * 1_000,
            ErrorKind::Permanent => 24 * 3_600 * 1_000,
            ErrorKind::Retryable => 12 * 3_600 * 1_000,
            ErrorKind::Transient => self.config.open_timeout.as_millis() as i64,
            ErrorKind::RateLimited => {
                let base = inner.learned_rate_limit_backoff_ms.unwrap_or(MIN_RATE_LIMIT_BACKOFF_MS);
                Self::rate_limit_backoff_ms(base, k)
            }
        }
    }

    fn rate_limit_backoff_ms(base_ms: i64, k: u32) -> i64 {
        let scaled = (base_ms as f64) * 3f64.powi(k as i32);
        (scaled as i64).min(MAX_RATE_LIMIT_BACKOFF_MS)
    }

    fn flap_guard_multiplier(kind: ErrorKind, k: u32) -> f64 {
        let cap = match kind {
            ErrorKind::NonRetryable | ErrorKind::Permanent => 5.0,
            _ => 10.0,
        };
        2f64.powi((k as i32) - 3).min(cap).max(1.0)
    }

    /// Record a successful call.
    pub fn record_success(&self, clock: &dyn Clock) {
        let mut inner = self.inner.lock().unwrap();
        let now = clock.now_ms();
        inner.success_count += 1;
        inner.ever_succeeded = true;
        inner.last_success_ms = Some(now);
        inner.window.add(now, true, None);
        inner.error_rate =
            self.config.smoothing_alpha * inner.window.error_rate(now) + (1.0 - self.config.smoothing_alpha) * inner.error_rate;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.recovery_success_threshold {
                    if inner.last_error_kind == Some(ErrorKind::RateLimited) {
                        let used = inner
                            .next_retry_at_ms
                            .zip(inner.half_open_started_at_ms)
                            .map(|(retry, started)| (retry - started).max(MIN_RATE_LIMIT_BACKOFF_MS))
                            .unwrap_or(MIN_RATE_LIMIT_BACKOFF_MS);
                        inner.learned_rate_limit_backoff_ms = Some(used);
                    }
                    inner.consecutive_failed_recoveries = 0;
                    inner.failure_count = 0;
                    inner.rate_limit_consecutive_failures = 0;
                    self.set_state(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call already classified by [`crate::classifier::FailureClassifier`].
    pub fn record_failure(&self, clock: &dyn Clock, classification: Classification, failure: &UpstreamFailure) {
        let mut inner = self.inner.lock().unwrap();
        let now = clock.now_ms();

        inner.last_failure_ms = Some(now);
        inner.last_failure_reason = Some(failure.message.clone());
        inner.last_error_kind = Some(classification.kind);
        inner.window.add(now, false, Some(classification.kind));
        inner.error_rate =
            self.config.smoothing_alpha * inner.window.error_rate(now) + (1.0 - self.config.smoothing_alpha) * inner.error_rate;

        if !classification.should_circuit_break {
            return;
        }

        if classification.kind == ErrorKind::RateLimited {
            inner.rate_limit_consecutive_failures += 1;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                let threshold = self.adaptive_threshold(&mut inner, now);
                let error_rate = inner.error_rate;
                if inner.failure_count >= threshold || error_rate > self.config.error_rate_threshold {
                    let k = inner.rate_limit_consecutive_failures.saturating_sub(1);
                    let backoff = self.first_failure_backoff_ms(classification.kind, &inner, k);
                    inner.next_retry_at_ms = Some(now + backoff);
                    self.set_state(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_attempts += 1;
                inner.consecutive_failed_recoveries += 1;
                inner.consecutive_successes = 0;

                let k = inner.consecutive_failed_recoveries;
                let rl_k = inner.rate_limit_consecutive_failures.saturating_sub(1);
                let base_backoff = self.first_failure_backoff_ms(classification.kind, &inner, rl_k);
                let backoff_ms = if k >= 3 {
                    (base_backoff as f64 * Self::flap_guard_multiplier(classification.kind, k)) as i64
                } else {
                    base_backoff
                };
                inner.next_retry_at_ms = Some(now + backoff_ms);
                self.set_state(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn force_open(&self, clock: &dyn Clock, for_duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_retry_at_ms = Some(clock.now_ms() + for_duration.as_millis() as i64);
        self.set_state(&mut inner, CircuitState::Open);
    }

    pub fn force_closed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.consecutive_failed_recoveries = 0;
        self.set_state(&mut inner, CircuitState::Closed);
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_request_count: 0,
            blocked_request_count: 0,
            consecutive_successes: 0,
            half_open_attempts: 0,
            consecutive_failed_recoveries: 0,
            active_tests_in_progress: 0,
            ever_succeeded: false,
            last_failure_ms: None,
            last_success_ms: None,
            next_retry_at_ms: None,
            half_open_started_at_ms: None,
            last_failure_reason: None,
            last_error_kind: None,
            model_type: inner.model_type,
            error_rate: 0.0,
            rate_limit_consecutive_failures: 0,
            learned_rate_limit_backoff_ms: None,
            window: SlidingWindow::new(self.config.window_capacity, self.config.window_duration.as_millis() as i64),
        };
        self.state_fast.store(CircuitState::Closed.to_u8(), Ordering::Release);
    }

    pub fn model_type(&self) -> Option<ModelType> {
        self.inner.lock().unwrap().model_type
    }

    /// Active testing (C5) may override the inferred model type.
    pub fn set_model_type(&self, model_type: ModelType) {
        self.inner.lock().unwrap().model_type = Some(model_type);
    }

    pub fn mark_test_started(&self) {
        self.inner.lock().unwrap().active_tests_in_progress += 1;
    }

    pub fn mark_test_finished(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.active_tests_in_progress = inner.active_tests_in_progress.saturating_sub(1);
    }

    /// Restores counters from a persisted snapshot. If the persisted
    /// state is `open` and its `nextRetryAt` has already passed, the
    /// circuit comes back as `half-open` instead, matching live restart
    /// behavior rather than waiting for one more admission check.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        &self,
        state: CircuitState,
        failure_count: u32,
        success_count: u64,
        total_request_count: u64,
        blocked_request_count: u64,
        consecutive_failed_recoveries: u32,
        consecutive_successes: u32,
        last_failure_ms: Option<i64>,
        last_success_ms: Option<i64>,
        next_retry_at_ms: Option<i64>,
        half_open_started_at_ms: Option<i64>,
        last_failure_reason: Option<String>,
        last_error_kind: Option<ErrorKind>,
        error_rate: f64,
        error_counts: std::collections::HashMap<ErrorKind, u32>,
        model_type: Option<ModelType>,
        learned_rate_limit_backoff_ms: Option<i64>,
        now_ms: i64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = failure_count;
        inner.success_count = success_count;
        inner.total_request_count = total_request_count;
        inner.blocked_request_count = blocked_request_count;
        inner.consecutive_failed_recoveries = consecutive_failed_recoveries;
        inner.consecutive_successes = consecutive_successes;
        inner.last_failure_ms = last_failure_ms;
        inner.last_success_ms = last_success_ms;
        inner.next_retry_at_ms = next_retry_at_ms;
        inner.last_failure_reason = last_failure_reason;
        inner.last_error_kind = last_error_kind;
        inner.model_type = model_type.or(inner.model_type);
        inner.learned_rate_limit_backoff_ms = learned_rate_limit_backoff_ms;
        inner.ever_succeeded = success_count > 0;

        // The sliding window's individual timestamped entries are not
        // part of the persisted snapshot; re-seed it with the persisted
        // failure tally (all at the restore instant) so the adaptive
        // threshold has something to work with immediately, and restore
        // the smoothed error rate directly rather than recomputing it
        // from scratch.
        for (kind, count) in &error_counts {
            for _ in 0..*count {
                inner.window.add(now_ms, false, Some(*kind));
            }
        }
        inner.error_rate = error_rate;

        let effective_state = if state == CircuitState::Open
            && next_retry_at_ms.map(|t| now_ms >= t).unwrap_or(false)
        {
            CircuitState::HalfOpen
        } else {
            state
        };
        if effective_state == CircuitState::HalfOpen {
            inner.half_open_started_at_ms = Some(half_open_started_at_ms.unwrap_or(now_ms));
            inner.active_tests_in_progress = 0;
            inner.consecutive_successes = 0;
        } else {
            inner.half_open_started_at_ms = half_open_started_at_ms;
        }
        self.set_state(&mut inner, effective_state);
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock().unwrap();
        CircuitStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_request_count: inner.total_request_count,
            blocked_request_count: inner.blocked_request_count,
            consecutive_successes: inner.consecutive_successes,
            half_open_attempts: inner.half_open_attempts,
            consecutive_failed_recoveries: inner.consecutive_failed_recoveries,
            active_tests_in_progress: inner.active_tests_in_progress,
            last_failure_ms: inner.last_failure_ms,
            last_success_ms: inner.last_success_ms,
            next_retry_at_ms: inner.next_retry_at_ms,
            half_open_started_at_ms: inner.half_open_started_at_ms,
            last_failure_reason: inner.last_failure_reason.clone(),
            last_error_kind: inner.last_error_kind,
            model_type: inner.model_type,
            error_rate: inner.error_rate,
            error_counts: inner.window.error_counts_by_kind_snapshot(),
            rate_limit_consecutive_failures: inner.rate_limit_consecutive_failures,
            learned_rate_limit_backoff_ms: inner.learned_rate_limit_backoff_ms,
        }
    }
}

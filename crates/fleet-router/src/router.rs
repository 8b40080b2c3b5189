//! C9: candidate selection plus the two-phase failover execution
//! policy.

use crate::candidates::{self, Candidate};
use crate::context::RoutingContext;
use crate::error::RouterError;
use fleet_breaker::{BreakerRegistry, UpstreamFailure};
use fleet_core::config::RouterConfig;
use fleet_core::{BreakerKey, Capability, Classification, Clock, ErrorKind, ModelName};
use fleet_registry::ServerRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// What an attempt against one server produced when it failed: the
/// classification drives both the breaker recording and the failover
/// policy's retry/propagate decision.
pub struct AttemptError {
    pub classification: Classification,
    pub failure: UpstreamFailure,
}

pub struct Router {
    config: RouterConfig,
    servers: Arc<ServerRegistry>,
    breakers: Arc<BreakerRegistry>,
    clock: Arc<dyn Clock>,
}

impl Router {
    pub fn new(config: RouterConfig, servers: Arc<ServerRegistry>, breakers: Arc<BreakerRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { config, servers, breakers, clock }
    }

    /// Whether at least one server currently admits a request for this
    /// `(model, capability)` pair. Used by the priority queue's
    /// dispatcher to decide when a waiting item can be released.
    pub fn has_capacity(&self, model: &str, capability: Capability) -> bool {
        !self.candidates(model, capability, false).is_empty()
    }

    fn candidates(&self, model: &str, capability: Capability, bypass: bool) -> Vec<Candidate> {
        candidates::eligible_candidates(&self.servers, &self.breakers, &self.config, model, capability, bypass)
    }

    /// Applies the documented per-kind side effects of a failed attempt:
    /// permanent bans (and, for server-wide reasons, marking the server
    /// unhealthy plus a forced breaker open), cooldowns for
    /// non-retryable/transient failures, and unhealthy-marking once a
    /// server's transient failure count crosses the configured
    /// threshold. Breaker failure recording itself happens in
    /// `record_failure`/the caller, not here.
    pub fn handle_server_error(&self, server_id: &fleet_core::ServerId, model: &str, classification: Classification, failure: &UpstreamFailure) {
        const SERVER_WIDE_PATTERNS: &[&str] = &["disk full", "server crash", "out of memory", "kernel panic"];

        match classification.kind {
            ErrorKind::Permanent => {
                self.servers.ban(server_id, model, Some(failure.message.clone()));
                let lower = failure.message.to_ascii_lowercase();
                if SERVER_WIDE_PATTERNS.iter().any(|p| lower.contains(p)) {
                    if let Some(breaker) = self.breakers.get(&BreakerKey::server(server_id.clone())) {
                        breaker.force_open(self.clock.as_ref(), Duration::from_secs(24 * 3600));
                    }
                    let _ = self.servers.mark_unhealthy(server_id);
                }
            }
            ErrorKind::NonRetryable => {
                self.servers.mark_failure(server_id, model);
            }
            ErrorKind::Transient => {
                self.servers.mark_failure(server_id, model);
                if self.servers.record_transient_failure(server_id, self.config.unhealthy_failure_threshold) {
                    let _ = self.servers.mark_unhealthy(server_id);
                }
            }
            ErrorKind::RateLimited | ErrorKind::Retryable => {}
        }
    }

    /// Phase 1: same-server retries on a retryable/rate-limit-coded
    /// failure, failing over to the next candidate on anything else.
    /// Phase 2: retries every candidate once more with the breaker
    /// bypassed, but only for failures that were `transient`.
    pub async fn try_request_with_failover<F, Fut, T>(
        &self,
        model: &str,
        capability: Capability,
        op: F,
        mut ctx: Option<&mut RoutingContext>,
    ) -> Result<T, RouterError>
    where
        F: Fn(&fleet_registry::Server) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempts: Vec<(String, ErrorKind)> = Vec::new();

        // Phase 1: score-ordered candidates, same-server retries on a
        // retryable classification or a status in `retryableStatusCodes`.
        let phase1 = self.candidates(model, capability, false);
        if let Some(ctx) = ctx.as_deref_mut() {
            ctx.available_server_count = phase1.len();
        }

        let mut transient_server_ids = std::collections::HashSet::new();

        for candidate in &phase1 {
            let server_id = candidate.server.id.clone();

            // `eligible_candidates` only peeked at breaker state to build
            // this list; the real admission (and the only place the
            // breaker mutates `totalRequestCount` or transitions an
            // expired `open` breaker to `half-open`) happens here, for
            // the one candidate about to actually be dispatched to.
            if !candidate.server_breaker.try_acquire(self.clock.as_ref()) || !candidate.model_breaker.try_acquire(self.clock.as_ref()) {
                continue;
            }

            let _guard = self.servers.acquire_in_flight(&server_id, model, false);

            let mut retry = 0u32;
            loop {
                match op(&candidate.server).await {
                    Ok(value) => {
                        candidate.server_breaker.record_success(self.clock.as_ref());
                        candidate.model_breaker.record_success(self.clock.as_ref());
                        self.servers.reset_transient_failures(&server_id);
                        self.fill_success_context(ctx.as_deref_mut(), &server_id, candidate, retry);
                        return Ok(value);
                    }
                    Err(attempt_error) => {
                        self.record_failure(candidate, &attempt_error);
                        self.handle_server_error(&server_id, model, attempt_error.classification, &attempt_error.failure);

                        let retryable_here = attempt_error.classification.kind == ErrorKind::Retryable
                            || attempt_error
                                .failure
                                .status
                                .map(|s| self.config.retryable_status_codes.contains(&s))
                                .unwrap_or(false);

                        if retryable_here && retry < self.config.max_same_server_retries {
                            self.sleep_backoff(retry).await;
                            retry += 1;
                            continue;
                        }

                        if attempt_error.classification.kind == ErrorKind::Transient {
                            transient_server_ids.insert(server_id.clone());
                        }
                        attempts.push((server_id.to_string(), attempt_error.classification.kind));
                        break;
                    }
                }
            }
        }

        // Phase 2: one bypassed retry per candidate that failed
        // transiently in phase 1, so a breaker we just opened ourselves
        // does not permanently shadow a server that may still recover.
        if !transient_server_ids.is_empty() {
            let phase2 = self.candidates(model, capability, true);
            if let Some(ctx) = ctx.as_deref_mut() {
                ctx.bypass_used = true;
            }

            for candidate in phase2.into_iter().filter(|c| transient_server_ids.contains(&c.server.id)) {
                let server_id = candidate.server.id.clone();
                let _guard = self.servers.acquire_in_flight(&server_id, model, true);

                match op(&candidate.server).await {
                    Ok(value) => {
                        candidate.server_breaker.record_success(self.clock.as_ref());
                        candidate.model_breaker.record_success(self.clock.as_ref());
                        self.servers.reset_transient_failures(&server_id);
                        self.fill_success_context(ctx.as_deref_mut(), &server_id, &candidate, 0);
                        return Ok(value);
                    }
                    Err(attempt_error) => {
                        self.record_failure(&candidate, &attempt_error);
                        attempts.push((server_id.to_string(), attempt_error.classification.kind));
                    }
                }
            }
        }

        Err(RouterError::Exhausted(attempts))
    }

    fn record_failure(&self, candidate: &Candidate, attempt_error: &AttemptError) {
        candidate
            .model_breaker
            .record_failure(self.clock.as_ref(), attempt_error.classification, &attempt_error.failure);
        if attempt_error.classification.should_circuit_break {
            candidate
                .server_breaker
                .record_failure(self.clock.as_ref(), attempt_error.classification, &attempt_error.failure);
        }
    }

    fn fill_success_context(&self, ctx: Option<&mut RoutingContext>, server_id: &fleet_core::ServerId, candidate: &Candidate, retry: u32) {
        if let Some(ctx) = ctx {
            ctx.selected_server_id = Some(server_id.to_string());
            let (s, m) = candidates::circuit_states(&candidate.server_breaker, &candidate.model_breaker);
            ctx.server_circuit_state = Some(s);
            ctx.model_circuit_state = Some(m);
            ctx.retry_count = retry;
        }
    }

    async fn sleep_backoff(&self, retry: u32) {
        let delay = (self.config.retry_delay.as_millis() as f64 * self.config.retry_backoff_multiplier.powi(retry as i32))
            .min(self.config.max_retry_delay.as_millis() as f64);
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }

    /// Diagnostic single-server path: still enforces cooldown, bans and
    /// in-flight caps, but skips breaker admission when asked.
    pub async fn request_to_server<F, Fut, T>(
        &self,
        server_id: &fleet_core::ServerId,
        model: &str,
        bypass_circuit_breaker: bool,
        op: F,
    ) -> Result<T, RouterError>
    where
        F: FnOnce(&fleet_registry::Server) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let server = self
            .servers
            .get_server(server_id)
            .ok_or_else(|| RouterError::ServerNotFound(server_id.to_string()))?;

        if !server.is_eligible()
            || self.servers.is_in_cooldown(server_id, model)
            || self.servers.is_permanently_banned(server_id, model)
            || self.servers.in_flight_count(server_id, model) >= server.max_concurrency
        {
            return Err(RouterError::NotEligible(server_id.to_string(), model.to_string()));
        }

        if !bypass_circuit_breaker {
            if let Ok(model_name) = ModelName::new(model) {
                let server_breaker = self.breakers.get_or_create(BreakerKey::server(server_id.clone()));
                let model_breaker = self.breakers.get_or_create(BreakerKey::model(server_id.clone(), model_name));
                if !server_breaker.try_acquire(self.clock.as_ref()) || !model_breaker.try_acquire(self.clock.as_ref()) {
                    return Err(RouterError::NotEligible(server_id.to_string(), model.to_string()));
                }
            }
        }

        let _guard = self.servers.acquire_in_flight(server_id, model, bypass_circuit_breaker);
        match op(&server).await {
            Ok(value) => Ok(value),
            Err(attempt_error) => {
                self.handle_server_error(server_id, model, attempt_error.classification, &attempt_error.failure);
                Err(RouterError::Exhausted(vec![(server_id.to_string(), attempt_error.classification.kind)]))
            }
        }
    }
}

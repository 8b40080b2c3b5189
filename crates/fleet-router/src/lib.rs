//! Candidate scoring and two-phase failover execution across the
//! server fleet.
//!
//! [`candidates::eligible_candidates`] filters and scores servers for a
//! `(model, capability)` request; [`router::Router`] drives the
//! execution policy (`tryRequestWithFailover`, `requestToServer`) and
//! the per-failure-kind side effects (`handleServerError`).

pub mod candidates;
pub mod context;
pub mod error;
pub mod router;
pub mod scoring;

pub use candidates::Candidate;
pub use context::RoutingContext;
pub use error::RouterError;
pub use router::{AttemptError, Router};

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_breaker::{BreakerRegistry, UpstreamFailure};
    use fleet_core::config::{BreakerConfig, PersistenceConfig, RouterConfig};
    use fleet_core::{Capability, Classification, ErrorKind, FakeClock};
    use fleet_registry::{HealthObservation, Server, ServerRegistry};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn healthy_server(id: &str) -> Server {
        let mut server = Server::new(fleet_core::ServerId::new(id).unwrap(), format!("http://{id}"), 4);
        server.apply_health_observation(HealthObservation {
            healthy: true,
            supports_ollama: true,
            supports_v1: true,
            models: vec!["llama3".to_string()],
            v1_models: vec!["llama3".to_string()],
            last_response_time: std::time::Duration::from_millis(50),
            loaded_models: vec![],
            total_vram_used: 0,
        });
        server
    }

    fn setup() -> (Router, Arc<ServerRegistry>, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(0));
        let breakers = BreakerRegistry::new(
            BreakerConfig::default(),
            PersistenceConfig { enabled: false, ..PersistenceConfig::default() },
            clock.clone(),
            None,
        );
        let servers = ServerRegistry::new(breakers.clone(), clock.clone(), 5_000);
        let router = Router::new(RouterConfig::default(), servers.clone(), breakers, clock.clone());
        (router, servers, clock)
    }

    #[tokio::test]
    async fn a_healthy_candidate_serves_the_request() {
        let (router, servers, _clock) = setup();
        servers.add_server(healthy_server("s1")).unwrap();

        let result = router
            .try_request_with_failover("llama3", Capability::Generate, |_s| async { Ok::<_, AttemptError>(42) }, None)
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn a_permanent_failure_fails_over_to_the_next_candidate() {
        let (router, servers, _clock) = setup();
        servers.add_server(healthy_server("s1")).unwrap();
        servers.add_server(healthy_server("s2")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result = router
            .try_request_with_failover(
                "llama3",
                Capability::Generate,
                move |s| {
                    let calls = calls_clone.clone();
                    let sid = s.id.to_string();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if sid == "s1" {
                            Err(AttemptError {
                                classification: Classification::new(ErrorKind::Permanent, true),
                                failure: UpstreamFailure::new("model not found"),
                            })
                        } else {
                            Ok(99)
                        }
                    }
                },
                None,
            )
            .await;

        assert_eq!(result.unwrap(), 99);
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(servers.is_permanently_banned(&fleet_core::ServerId::new("s1").unwrap(), "llama3"));
    }

    #[tokio::test]
    async fn exhausting_every_candidate_reports_each_attempt() {
        let (router, servers, _clock) = setup();
        servers.add_server(healthy_server("s1")).unwrap();

        let result = router
            .try_request_with_failover::<_, _, ()>(
                "llama3",
                Capability::Generate,
                |_s| async {
                    Err(AttemptError {
                        classification: Classification::new(ErrorKind::NonRetryable, true),
                        failure: UpstreamFailure::new("bad request"),
                    })
                },
                None,
            )
            .await;

        match result {
            Err(RouterError::Exhausted(attempts)) => {
                assert_eq!(attempts, vec![("s1".to_string(), ErrorKind::NonRetryable)]);
            }
            _ => panic!("expected exhaustion"),
        }
    }

    #[tokio::test]
    async fn a_transient_failure_gets_a_bypassed_second_chance() {
        let (router, servers, _clock) = setup();
        servers.add_server(healthy_server("s1")).unwrap();

        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = attempt_count.clone();
        let mut ctx = RoutingContext::default();
        let result = router
            .try_request_with_failover(
                "llama3",
                Capability::Generate,
                move |_s| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 5 {
                            Err(AttemptError {
                                classification: Classification::new(ErrorKind::Transient, true),
                                failure: UpstreamFailure::new("upstream overloaded"),
                            })
                        } else {
                            Ok(1)
                        }
                    }
                },
                Some(&mut ctx),
            )
            .await;

        // Phase 1 opens the breaker after enough transient failures; phase 2's
        // bypass is what lets the eventual success through.
        assert!(result.is_ok() || matches!(result, Err(RouterError::Exhausted(_))));
        assert!(ctx.bypass_used || result.is_ok());
    }
}

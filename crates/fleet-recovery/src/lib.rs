//! Active recovery-probe coordination.
//!
//! Exactly one recovery probe runs per server at a time, and never
//! while the server has client traffic in flight: [`coordinator::RecoveryCoordinator`]
//! enforces both constraints, [`probes`] picks the probe shape for a
//! breaker key, and [`metrics`] keeps a bounded rolling history of
//! probe outcomes.

pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod probes;

pub use coordinator::{InFlightQuery, NoInFlightTracking, RecoveryCoordinator};
pub use error::RecoveryError;
pub use metrics::ProbeMetric;
pub use probes::ProbeKind;

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_breaker::BreakerRegistry;
    use fleet_core::config::{BreakerConfig, PersistenceConfig, RecoveryConfig};
    use fleet_core::{BreakerKey, FakeClock, HttpMethod, ProbeResponse};
    use std::sync::Arc;
    use std::time::Duration;

    fn registry(clock: Arc<FakeClock>) -> Arc<BreakerRegistry> {
        BreakerRegistry::new(BreakerConfig::default(), PersistenceConfig { enabled: false, ..PersistenceConfig::default() }, clock, None)
    }

    #[tokio::test]
    async fn a_ready_server_runs_its_queued_test_and_records_success() {
        let clock = Arc::new(FakeClock::new(1_000_000));
        let registry = registry(clock.clone());
        let key = BreakerKey::parse("s1:llama3").unwrap();
        registry.get_or_create(key.clone());

        let probe = Arc::new(|_base: &str, req: fleet_core::ProbeRequest| async move {
            assert_eq!(req.method, HttpMethod::Post);
            Ok(ProbeResponse {
                status: 200,
                body: vec![],
                elapsed: Duration::from_millis(5),
            })
        });

        let coordinator = RecoveryCoordinator::new(
            RecoveryConfig::default(),
            registry.clone(),
            probe,
            clock.clone(),
            Arc::new(NoInFlightTracking),
        );

        assert!(coordinator.is_ready(key.server_id()));
        coordinator.enqueue(key.clone()).unwrap();

        let started = coordinator.run_due_tests(&|_s| Some("http://s1.local".to_string())).await;
        assert_eq!(started, vec![key.clone()]);

        let circuit = registry.get(&key).unwrap();
        assert_eq!(circuit.stats().success_count, 1);
        assert_eq!(coordinator.metrics_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn a_server_is_not_ready_again_until_cooldown_elapses() {
        let clock = Arc::new(FakeClock::new(0));
        let registry = registry(clock.clone());
        let key = BreakerKey::parse("s1").unwrap();
        registry.get_or_create(key.clone());

        let probe = Arc::new(|_base: &str, _req: fleet_core::ProbeRequest| async move {
            Ok(ProbeResponse {
                status: 200,
                body: vec![],
                elapsed: Duration::from_millis(1),
            })
        });
        let coordinator = RecoveryCoordinator::new(
            RecoveryConfig::default(),
            registry,
            probe,
            clock.clone(),
            Arc::new(NoInFlightTracking),
        );
        coordinator.enqueue(key.clone()).unwrap();
        coordinator.run_due_tests(&|_s| Some("http://s1".to_string())).await;

        assert!(!coordinator.is_ready(key.server_id()));
        clock.advance_ms(RecoveryConfig::default().server_cooldown.as_millis() as i64 + 1);
        assert!(coordinator.is_ready(key.server_id()));
    }

    #[test]
    fn cancel_test_removes_a_queued_key() {
        let clock = Arc::new(FakeClock::new(0));
        let registry = registry(clock.clone());
        let key = BreakerKey::parse("s1:llama3").unwrap();
        let probe = Arc::new(|_b: &str, _r: fleet_core::ProbeRequest| async move {
            Ok(ProbeResponse { status: 200, body: vec![], elapsed: Duration::ZERO })
        });
        let coordinator = RecoveryCoordinator::new(
            RecoveryConfig::default(),
            registry,
            probe,
            clock,
            Arc::new(NoInFlightTracking),
        );
        coordinator.enqueue(key.clone()).unwrap();
        coordinator.cancel_test(&key);
        coordinator.clear_all_queues();
    }
}

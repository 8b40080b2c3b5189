//! Wraps the priority queue as an admission gate: a caller that would
//! otherwise exceed a server's concurrency limit waits on a oneshot
//! instead of being rejected outright, and a background dispatcher
//! releases waiters as capacity frees up.

use fleet_core::{Capability, EndpointKind};
use fleet_queue::{PriorityQueue, QueueConfig, QueueItem, QueueOutcome};
use fleet_router::Router;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const DISPATCH_INTERVAL: Duration = Duration::from_millis(25);

pub struct QueueAdmission {
    queue: Arc<PriorityQueue<()>>,
    router: Arc<Router>,
    next_id: AtomicU64,
    stopped: Arc<AtomicBool>,
}

/// What a caller gets back from [`QueueAdmission::submit`]: either
/// immediate clearance or a receiver to await once a slot frees up.
pub enum Admission {
    Proceed,
    Wait(oneshot::Receiver<QueueOutcome<()>>),
}

impl QueueAdmission {
    pub fn new(config: QueueConfig, clock: Arc<dyn fleet_core::Clock>, router: Arc<Router>) -> Self {
        Self {
            queue: PriorityQueue::new(config, clock),
            router,
            next_id: AtomicU64::new(1),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &Arc<PriorityQueue<()>> {
        &self.queue
    }

    /// Admits immediately if a server currently has room; otherwise
    /// enqueues and returns a receiver the caller awaits before
    /// attempting the request.
    pub fn submit(
        &self,
        model: &str,
        capability: Capability,
        priority: u32,
        deadline_ms: i64,
        client_id: Option<String>,
    ) -> Result<Admission, fleet_queue::QueueError> {
        if self.router.has_capacity(model, capability) {
            return Ok(Admission::Proceed);
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let item = QueueItem {
            id,
            model: model.to_string(),
            priority,
            enqueue_time_ms: 0,
            deadline_ms,
            endpoint_kind: EndpointKind::Ollama,
            capability,
            client_id,
            payload: (),
            resolver: Some(tx),
        };
        self.queue.enqueue(item)?;
        Ok(Admission::Wait(rx))
    }

    /// Spawns the background task that releases queued items once their
    /// model regains capacity, oldest-priority-first. Stopped by
    /// dropping the returned handle's effect via [`Self::shutdown`].
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DISPATCH_INTERVAL);
            loop {
                ticker.tick().await;
                if this.stopped.load(Ordering::SeqCst) {
                    return;
                }
                this.dispatch_ready();
            }
        });
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn dispatch_ready(&self) {
        loop {
            let Some(view) = self.queue.peek() else { return };
            if !self.router.has_capacity(&view.model, view.capability) {
                return;
            }
            let Some(item) = self.queue.dequeue() else { return };
            item.resolve(QueueOutcome::Ready(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_breaker::BreakerRegistry;
    use fleet_core::config::{BreakerConfig, PersistenceConfig, RouterConfig};
    use fleet_core::FakeClock;
    use fleet_registry::{HealthObservation, Server, ServerRegistry};

    fn router_with_no_servers() -> (Arc<Router>, Arc<ServerRegistry>, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(0));
        let breakers = BreakerRegistry::new(
            BreakerConfig::default(),
            PersistenceConfig { enabled: false, ..PersistenceConfig::default() },
            clock.clone(),
            None,
        );
        let servers = ServerRegistry::new(breakers.clone(), clock.clone(), 5_000);
        let router = Arc::new(Router::new(RouterConfig::default(), servers.clone(), breakers, clock.clone()));
        (router, servers, clock)
    }

    #[tokio::test]
    async fn submitting_with_no_capacity_queues_rather_than_rejecting() {
        let (router, _servers, clock) = router_with_no_servers();
        let admission = QueueAdmission::new(QueueConfig::default(), clock, router);

        let result = admission.submit("llama3", Capability::Generate, 5, 0, None).unwrap();
        assert!(matches!(result, Admission::Wait(_)));
        assert_eq!(admission.queue().size(), 1);
    }

    #[tokio::test]
    async fn submitting_with_capacity_proceeds_immediately() {
        let (router, servers, _clock) = router_with_no_servers();
        let mut server = Server::new(fleet_core::ServerId::new("s1").unwrap(), "http://s1", 4);
        server.apply_health_observation(HealthObservation {
            healthy: true,
            supports_ollama: true,
            supports_v1: false,
            models: vec!["llama3".to_string()],
            v1_models: vec![],
            last_response_time: Duration::from_millis(10),
            loaded_models: vec![],
            total_vram_used: 0,
        });
        servers.add_server(server).unwrap();

        let admission = QueueAdmission::new(QueueConfig::default(), Arc::new(FakeClock::new(0)), router);
        let result = admission.submit("llama3", Capability::Generate, 5, 0, None).unwrap();
        assert!(matches!(result, Admission::Proceed));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_releases_a_waiter_once_capacity_appears() {
        let (router, servers, clock) = router_with_no_servers();
        let admission = Arc::new(QueueAdmission::new(QueueConfig::default(), clock, router));
        admission.start();

        let result = admission.submit("llama3", Capability::Generate, 5, 0, None).unwrap();
        let Admission::Wait(rx) = result else { panic!("expected to wait") };

        let mut server = Server::new(fleet_core::ServerId::new("s1").unwrap(), "http://s1", 4);
        server.apply_health_observation(HealthObservation {
            healthy: true,
            supports_ollama: true,
            supports_v1: false,
            models: vec!["llama3".to_string()],
            v1_models: vec![],
            last_response_time: Duration::from_millis(10),
            loaded_models: vec![],
            total_vram_used: 0,
        });
        servers.add_server(server).unwrap();

        tokio::time::advance(DISPATCH_INTERVAL * 2).await;
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, QueueOutcome::Ready(())));
    }
}

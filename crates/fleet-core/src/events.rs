//! A small observability event bus shared by every core crate.
//!
//! Breaker transitions, router failover decisions and health-scheduler
//! batches are all observed this way rather than by logging directly
//! from deep call stacks, so a caller can wire up metrics, tracing, or
//! its own dashboard feed without the core crates knowing which.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An event emitted by some part of the control plane.
pub trait FleetEvent: Send + Sync + fmt::Debug {
    /// e.g. `"breaker_state_transition"`, `"router_failover"`.
    fn event_type(&self) -> &'static str;
    fn timestamp(&self) -> Instant;
    /// The name of the emitting component instance (a breaker key, a
    /// server id, ...).
    fn source(&self) -> &str;
}

pub trait EventListener<E: FleetEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A fan-out collection of listeners. A panicking listener cannot stop
/// the remaining listeners from being notified.
#[derive(Clone)]
pub struct EventListeners<E: FleetEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: FleetEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    source = event.source(),
                    event_type = event.event_type(),
                    "fleet event listener panicked"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "fleet_event_listener_panics_total",
                    "event_type" => event.event_type()
                )
                .increment(1);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: FleetEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A listener built from a plain closure.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: FleetEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        source: String,
    }

    impl FleetEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }
        fn timestamp(&self) -> Instant {
            Instant::now()
        }
        fn source(&self) -> &str {
            &self.source
        }
    }

    #[test]
    fn listeners_all_receive_events() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        let c2 = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c2.fetch_add(10, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent {
            source: "s1".into(),
        });

        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn a_panicking_listener_does_not_stop_the_rest() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &TestEvent| panic!("boom")));
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent {
            source: "s1".into(),
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

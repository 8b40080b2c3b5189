//! Breaker state-transition events, emitted through [`fleet_core::events`].

use crate::circuit::CircuitState;
use fleet_core::FleetEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct BreakerStateTransition {
    pub key: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: Option<String>,
    pub at: Instant,
}

impl FleetEvent for BreakerStateTransition {
    fn event_type(&self) -> &'static str {
        "breaker_state_transition"
    }

    fn timestamp(&self) -> Instant {
        self.at
    }

    fn source(&self) -> &str {
        &self.key
    }
}

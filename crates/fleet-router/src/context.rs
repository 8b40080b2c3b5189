//! The optional routing context a caller supplies to observe a failover
//! decision from the outside (surfaced as debug headers by the HTTP
//! layer, if one is listening).

use fleet_breaker::CircuitState;

#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub selected_server_id: Option<String>,
    pub server_circuit_state: Option<CircuitState>,
    pub model_circuit_state: Option<CircuitState>,
    pub available_server_count: usize,
    pub retry_count: u32,
    /// Set once any attempt used `bypassCircuitBreaker`, so heavy bypass
    /// usage is observable rather than silently amplifying an overload.
    pub bypass_used: bool,
}

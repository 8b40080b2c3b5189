//! C9 candidate scoring: a weighted sum of inverse latency, success
//! rate, inverse load and remaining capacity. Weights come from config
//! and need not sum to 1.

use fleet_core::config::RouterConfig;
use std::time::Duration;

pub struct ScoreInputs {
    pub p95_latency: Duration,
    pub success_rate: f64,
    pub in_flight: u32,
    pub max_concurrency: u32,
}

pub fn score(inputs: &ScoreInputs, weights: &RouterConfig) -> f64 {
    let latency_ms = inputs.p95_latency.as_millis().max(1) as f64;
    let inverse_latency = 1_000.0 / latency_ms;

    let capacity = inputs.max_concurrency.max(1) as f64;
    let load = (inputs.in_flight as f64 / capacity).min(1.0);
    let inverse_load = 1.0 - load;
    let remaining_capacity = 1.0 - load;

    weights.weight_latency * inverse_latency
        + weights.weight_success_rate * inputs.success_rate
        + weights.weight_load * inverse_load
        + weights.weight_capacity * remaining_capacity
}

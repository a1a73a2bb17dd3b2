use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use airpc_common::endpoint_key;

use crate::breaker::{BreakerRegistry, CircuitState};
use crate::timeout::TimeoutRegistry;

/// Locally observed metrics for a single endpoint.
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub addr: SocketAddr,
    pub circuit_state: CircuitState,
    /// Percentage in [0, 100].
    pub failure_rate: f32,
    /// Percentage in [0, 100].
    pub slow_call_rate: f32,
    pub total_calls: u32,
    pub p50_latency_ms: Option<u64>,
    pub p99_latency_ms: Option<u64>,
    pub avg_latency_ms: Option<f64>,
    pub sample_count: usize,
}

/// Aggregates client-side signals (breaker state, outcome rates, latency
/// percentiles) for load-balancing decisions.
pub struct MetricsCollector {
    breakers: Arc<BreakerRegistry>,
    timeouts: Arc<TimeoutRegistry>,
}

impl MetricsCollector {
    pub fn new(breakers: Arc<BreakerRegistry>, timeouts: Arc<TimeoutRegistry>) -> Self {
        MetricsCollector { breakers, timeouts }
    }

    /// Snapshot metrics for every endpoint of a service.
    pub fn collect(
        &self,
        service: &str,
        endpoints: &[SocketAddr],
    ) -> HashMap<SocketAddr, EndpointMetrics> {
        endpoints
            .iter()
            .map(|addr| {
                let key = endpoint_key(service, addr);
                (*addr, self.collect_endpoint(&key, *addr))
            })
            .collect()
    }

    fn collect_endpoint(&self, key: &str, addr: SocketAddr) -> EndpointMetrics {
        // Observation must not create state: endpoints we have never called
        // report neutral metrics.
        let (circuit_state, failure_rate, slow_call_rate, total_calls) =
            match self.breakers.get(key) {
                Some(breaker) => (
                    breaker.state(),
                    breaker.metrics().failure_rate(),
                    breaker.metrics().slow_call_rate(),
                    breaker.metrics().total_calls(),
                ),
                None => (CircuitState::Closed, 0.0, 0.0, 0),
            };

        let (p50, p99, avg, samples) = match self.timeouts.get(key) {
            Some(timeout) => {
                let stats = timeout.stats();
                (
                    stats.p50(),
                    stats.p99(),
                    stats.average(),
                    stats.sample_count(),
                )
            }
            None => (None, None, None, 0),
        };

        EndpointMetrics {
            addr,
            circuit_state,
            failure_rate,
            slow_call_rate,
            total_calls,
            p50_latency_ms: p50,
            p99_latency_ms: p99,
            avg_latency_ms: avg,
            sample_count: samples,
        }
    }

    /// Local weight multiplier in [0, 1] derived from breaker state and
    /// recent error/slow-call rates. Open circuits are excluded outright.
    pub fn local_weight(&self, metrics: &EndpointMetrics) -> f64 {
        let mut weight = 1.0;

        match metrics.circuit_state {
            CircuitState::Open => return 0.0,
            CircuitState::HalfOpen => weight *= 0.3,
            CircuitState::Closed => {}
        }

        if metrics.failure_rate > 50.0 {
            weight *= 0.2;
        } else if metrics.failure_rate > 20.0 {
            weight *= 0.5;
        } else if metrics.failure_rate > 10.0 {
            weight *= 0.8;
        }

        if metrics.slow_call_rate > 50.0 {
            weight *= 0.5;
        } else if metrics.slow_call_rate > 20.0 {
            weight *= 0.8;
        }

        weight
    }
}

//! Client-side call metrics.
//!
//! Per-service counters and latency percentiles for observability. Counter
//! updates are lock-free; the service map takes a read lock on the hot path
//! and a write lock only when a service is seen for the first time.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::timeout::LatencyStats;

const LATENCY_BUFFER_SIZE: usize = 1000;

struct ServiceStats {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    circuit_open_rejections: AtomicU64,
    retries: AtomicU64,
    latencies: LatencyStats,
}

impl ServiceStats {
    fn new() -> Self {
        ServiceStats {
            calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            circuit_open_rejections: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            latencies: LatencyStats::new(LATENCY_BUFFER_SIZE),
        }
    }
}

/// Snapshot of one service's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub service: String,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub circuit_open_rejections: u64,
    pub retries: u64,
    pub avg_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
    pub p99_latency_ms: Option<u64>,
}

#[derive(Default)]
pub struct ClientMetrics {
    services: RwLock<HashMap<String, Arc<ServiceStats>>>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, service: &str, latency: Duration) {
        let stats = self.stats_for(service);
        stats.calls.fetch_add(1, Ordering::Relaxed);
        stats.successes.fetch_add(1, Ordering::Relaxed);
        stats.latencies.record(latency.as_millis() as u64);
    }

    pub fn record_failure(&self, service: &str) {
        let stats = self.stats_for(service);
        stats.calls.fetch_add(1, Ordering::Relaxed);
        stats.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_open(&self, service: &str) {
        let stats = self.stats_for(service);
        stats.calls.fetch_add(1, Ordering::Relaxed);
        stats
            .circuit_open_rejections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self, service: &str) {
        self.stats_for(service).retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<ServiceMetrics> {
        let services = self.services.read().expect("metrics lock poisoned");
        let mut snapshot: Vec<ServiceMetrics> = services
            .iter()
            .map(|(service, stats)| ServiceMetrics {
                service: service.clone(),
                calls: stats.calls.load(Ordering::Relaxed),
                successes: stats.successes.load(Ordering::Relaxed),
                failures: stats.failures.load(Ordering::Relaxed),
                circuit_open_rejections: stats.circuit_open_rejections.load(Ordering::Relaxed),
                retries: stats.retries.load(Ordering::Relaxed),
                avg_latency_ms: stats.latencies.average(),
                p50_latency_ms: stats.latencies.p50(),
                p95_latency_ms: stats.latencies.p95(),
                p99_latency_ms: stats.latencies.p99(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.service.cmp(&b.service));
        snapshot
    }

    fn stats_for(&self, service: &str) -> Arc<ServiceStats> {
        if let Some(stats) = self
            .services
            .read()
            .expect("metrics lock poisoned")
            .get(service)
        {
            return Arc::clone(stats);
        }
        let mut services = self.services.write().expect("metrics lock poisoned");
        Arc::clone(
            services
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(ServiceStats::new())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ClientMetrics::new();
        metrics.record_success("svc", Duration::from_millis(10));
        metrics.record_success("svc", Duration::from_millis(30));
        metrics.record_failure("svc");
        metrics.record_circuit_open("svc");
        metrics.record_retry("svc");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 1);
        let m = &snapshot[0];
        assert_eq!(m.calls, 4);
        assert_eq!(m.successes, 2);
        assert_eq!(m.failures, 1);
        assert_eq!(m.circuit_open_rejections, 1);
        assert_eq!(m.retries, 1);
        assert_eq!(m.avg_latency_ms, Some(20.0));
    }

    #[test]
    fn test_services_are_independent() {
        let metrics = ClientMetrics::new();
        metrics.record_success("a", Duration::from_millis(1));
        metrics.record_failure("b");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].service, "a");
        assert_eq!(snapshot[0].failures, 0);
        assert_eq!(snapshot[1].service, "b");
        assert_eq!(snapshot[1].failures, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = ClientMetrics::new();
        metrics.record_success("svc", Duration::from_millis(5));
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"service\":\"svc\""));
    }
}

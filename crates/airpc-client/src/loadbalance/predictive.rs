use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use airpc_common::{Result, RpcError};

use super::collector::MetricsCollector;
use super::LoadBalancer;

/// Delay before the first scheduled weight refresh.
pub const REFRESH_INITIAL_DELAY: Duration = Duration::from_secs(5);
/// Period of the scheduled weight refresh.
pub const REFRESH_PERIOD: Duration = Duration::from_secs(10);

const PREDICTOR_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const PREDICTOR_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Predictive, weight-driven load balancer.
///
/// A background task periodically asks an external prediction service for a
/// health score per endpoint and publishes the result as an atomic snapshot.
/// Selection fuses the cached score with a local multiplier derived from the
/// endpoint's circuit breaker and recent outcome rates, then samples the
/// endpoints weighted-randomly. When the prediction service is unreachable
/// the cache degrades to uniform weights so selection falls back to
/// (approximately) uniform random.
pub struct PredictiveLoadBalancer {
    predictor_url: String,
    http: reqwest::Client,
    collector: Arc<MetricsCollector>,
    /// Weight cache. The map behind the `Arc` is never mutated in place;
    /// refreshes swap the whole reference so readers never see a torn view.
    weights: RwLock<Arc<HashMap<SocketAddr, f64>>>,
    /// Latest endpoint list observed by `select`, read by the refresh task.
    known_addresses: RwLock<Arc<Vec<SocketAddr>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl PredictiveLoadBalancer {
    /// Build the balancer and start its refresh task on the current runtime.
    pub fn start(
        predictor_url: impl Into<String>,
        collector: Arc<MetricsCollector>,
    ) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .connect_timeout(PREDICTOR_CONNECT_TIMEOUT)
            .timeout(PREDICTOR_READ_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Config(format!("predictor HTTP client: {}", e)))?;

        let balancer = Arc::new(PredictiveLoadBalancer {
            predictor_url: predictor_url.into(),
            http,
            collector,
            weights: RwLock::new(Arc::new(HashMap::new())),
            known_addresses: RwLock::new(Arc::new(Vec::new())),
            refresh_task: Mutex::new(None),
        });

        // The task holds a weak reference so dropping the balancer ends it.
        let weak = Arc::downgrade(&balancer);
        let task = tokio::spawn(async move {
            tokio::time::sleep(REFRESH_INITIAL_DELAY).await;
            let mut ticker = tokio::time::interval(REFRESH_PERIOD);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(balancer) => balancer.refresh_now().await,
                    None => break,
                }
            }
        });
        *balancer
            .refresh_task
            .lock()
            .expect("refresh task lock poisoned") = Some(task);

        Ok(balancer)
    }

    /// One refresh cycle: no-op until `select` has published an endpoint
    /// list, otherwise fetch scores and swap the cache.
    pub async fn refresh_now(&self) {
        let known = Arc::clone(
            &self
                .known_addresses
                .read()
                .expect("known addresses lock poisoned"),
        );
        if known.is_empty() {
            return;
        }
        debug!(nodes = known.len(), "refreshing predicted weights");
        let weights = self.fetch_weights(&known).await;
        self.publish_weights(weights);
    }

    /// The current weight cache snapshot.
    pub fn weights_snapshot(&self) -> Arc<HashMap<SocketAddr, f64>> {
        Arc::clone(&self.weights.read().expect("weight lock poisoned"))
    }

    fn publish_weights(&self, weights: HashMap<SocketAddr, f64>) {
        *self.weights.write().expect("weight lock poisoned") = Arc::new(weights);
    }

    /// Fetch scores for the given endpoints. Any HTTP or parse failure
    /// degrades to uniform weights of 1.0.
    async fn fetch_weights(&self, endpoints: &[SocketAddr]) -> HashMap<SocketAddr, f64> {
        let nodes: Vec<String> = endpoints
            .iter()
            .map(|a| format!("{}:{}", a.ip(), a.port()))
            .collect();

        match self.request_scores(&nodes).await {
            Ok(scores) => endpoints
                .iter()
                .map(|addr| {
                    let key = format!("{}:{}", addr.ip(), addr.port());
                    let score = scores.get(&key).copied().unwrap_or(1.0).max(0.0);
                    (*addr, score)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to fetch weights from prediction service, falling back to equal weights");
                endpoints.iter().map(|addr| (*addr, 1.0)).collect()
            }
        }
    }

    async fn request_scores(&self, nodes: &[String]) -> Result<HashMap<String, f64>> {
        let response = self
            .http
            .post(&self.predictor_url)
            .json(nodes)
            .send()
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RpcError::Connection(format!(
                "prediction service returned {}",
                response.status()
            )));
        }

        response
            .json::<HashMap<String, f64>>()
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))
    }
}

impl Drop for PredictiveLoadBalancer {
    fn drop(&mut self) {
        if let Ok(mut task) = self.refresh_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl LoadBalancer for PredictiveLoadBalancer {
    async fn select(&self, service: &str, endpoints: &[SocketAddr]) -> Option<SocketAddr> {
        if endpoints.is_empty() {
            return None;
        }
        if endpoints.len() == 1 {
            return Some(endpoints[0]);
        }

        *self
            .known_addresses
            .write()
            .expect("known addresses lock poisoned") = Arc::new(endpoints.to_vec());

        let mut weights = self.weights_snapshot();
        if weights.is_empty() {
            debug!("weight cache empty on first call, fetching synchronously");
            let fetched = self.fetch_weights(endpoints).await;
            self.publish_weights(fetched);
            weights = self.weights_snapshot();
        }

        let metrics = self.collector.collect(service, endpoints);
        let final_weights: Vec<(SocketAddr, f64)> = endpoints
            .iter()
            .map(|addr| {
                let cached = weights.get(addr).copied().unwrap_or(1.0);
                let multiplier = metrics
                    .get(addr)
                    .map(|m| self.collector.local_weight(m))
                    .unwrap_or(1.0);
                (*addr, cached * multiplier)
            })
            .collect();

        let total: f64 = final_weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            // every endpoint is excluded or zero-scored; degrade to uniform
            let idx = rand::thread_rng().gen_range(0..endpoints.len());
            return Some(endpoints[idx]);
        }

        let point = rand::thread_rng().gen_range(0.0..total);
        let mut cumulative = 0.0;
        for (addr, weight) in &final_weights {
            cumulative += weight;
            if point < cumulative {
                return Some(*addr);
            }
        }
        // rounding corner of the last bucket
        Some(endpoints[endpoints.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerRegistry, CircuitState};
    use crate::timeout::TimeoutRegistry;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn collector_with(breakers: Arc<BreakerRegistry>) -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new(
            breakers,
            Arc::new(TimeoutRegistry::default()),
        ))
    }

    fn balancer() -> (Arc<PredictiveLoadBalancer>, Arc<BreakerRegistry>) {
        let breakers = Arc::new(BreakerRegistry::default());
        // port 9 is discard; nothing listens there in tests, so any fetch
        // falls back to uniform weights
        let balancer = PredictiveLoadBalancer::start(
            "http://127.0.0.1:9/predict",
            collector_with(Arc::clone(&breakers)),
        )
        .unwrap();
        (balancer, breakers)
    }

    #[tokio::test]
    async fn test_empty_and_singleton() {
        let (balancer, _) = balancer();
        assert_eq!(balancer.select("svc", &[]).await, None);
        assert_eq!(
            balancer.select("svc", &[addr(9001)]).await,
            Some(addr(9001))
        );
    }

    #[tokio::test]
    async fn test_warmup_fetch_failure_degrades_to_uniform() {
        let (balancer, _) = balancer();
        let endpoints = vec![addr(9001), addr(9002)];

        assert!(balancer.weights_snapshot().is_empty());
        let picked = balancer.select("svc", &endpoints).await.unwrap();
        assert!(endpoints.contains(&picked));

        let weights = balancer.weights_snapshot();
        assert_eq!(weights.len(), 2);
        assert!(weights.values().all(|w| (*w - 1.0).abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn test_refresh_is_noop_without_known_addresses() {
        let (balancer, _) = balancer();
        balancer.refresh_now().await;
        assert!(balancer.weights_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_select_publishes_known_addresses() {
        let (balancer, _) = balancer();
        let endpoints = vec![addr(9001), addr(9002)];
        balancer.select("svc", &endpoints).await;

        // the refresh task sees the published list and now refreshes
        balancer.refresh_now().await;
        assert_eq!(balancer.weights_snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_heterogeneous_latencies_route_to_fast_endpoint() {
        let (balancer, _) = balancer();
        let endpoints = vec![addr(9001), addr(9002), addr(9003)];

        // Scores modeled as exp(-λ·latency) with λ = 0.02 for simulated
        // mean latencies of 10/50/200 ms.
        let lambda: f64 = 0.02;
        let weights: HashMap<SocketAddr, f64> = vec![
            (endpoints[0], (-lambda * 10.0).exp()),
            (endpoints[1], (-lambda * 50.0).exp()),
            (endpoints[2], (-lambda * 200.0).exp()),
        ]
        .into_iter()
        .collect();
        balancer.publish_weights(weights);

        let mut counts: HashMap<SocketAddr, u32> = HashMap::new();
        for _ in 0..10_000 {
            let picked = balancer.select("svc", &endpoints).await.unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }

        let fast = counts.get(&endpoints[0]).copied().unwrap_or(0) as f64 / 10_000.0;
        let slow = counts.get(&endpoints[2]).copied().unwrap_or(0) as f64 / 10_000.0;
        assert!(fast > 0.60, "fast endpoint got {:.3}", fast);
        assert!(slow < 0.05, "slow endpoint got {:.3}", slow);
    }

    #[tokio::test]
    async fn test_all_weights_zero_falls_back_to_uniform() {
        let (balancer, _) = balancer();
        let endpoints = vec![addr(9001), addr(9002), addr(9003)];
        balancer.publish_weights(endpoints.iter().map(|a| (*a, 0.0)).collect());

        let mut counts: HashMap<SocketAddr, u32> = HashMap::new();
        for _ in 0..1000 {
            let picked = balancer.select("svc", &endpoints).await.unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }

        for endpoint in &endpoints {
            let count = counts.get(endpoint).copied().unwrap_or(0);
            assert!(
                (250..=450).contains(&count),
                "endpoint {} got {} selections",
                endpoint,
                count
            );
        }
    }

    #[tokio::test]
    async fn test_open_breaker_excludes_endpoint() {
        let (balancer, breakers) = balancer();
        let endpoints = vec![addr(9001), addr(9002), addr(9003)];
        balancer.publish_weights(endpoints.iter().map(|a| (*a, 1.0)).collect());

        breakers
            .get_or_create("svc@127.0.0.1:9003")
            .force_state(CircuitState::Open);

        let mut open_hits = 0;
        for _ in 0..1000 {
            let picked = balancer.select("svc", &endpoints).await.unwrap();
            if picked == endpoints[2] {
                open_hits += 1;
            }
        }
        assert_eq!(open_hits, 0);
    }

    #[tokio::test]
    async fn test_weight_snapshot_is_never_torn() {
        let (balancer, _) = balancer();
        let endpoints = vec![addr(9001), addr(9002), addr(9003)];

        let writer = {
            let balancer = Arc::clone(&balancer);
            let endpoints = endpoints.clone();
            tokio::spawn(async move {
                for round in 0..500u32 {
                    let w = if round % 2 == 0 { 1.0 } else { 2.0 };
                    balancer.publish_weights(endpoints.iter().map(|a| (*a, w)).collect());
                }
            })
        };

        for _ in 0..500 {
            let snapshot = balancer.weights_snapshot();
            if snapshot.is_empty() {
                continue;
            }
            let values: Vec<f64> = snapshot.values().copied().collect();
            assert!(
                values.iter().all(|v| *v == values[0]),
                "torn snapshot: {:?}",
                values
            );
        }

        writer.await.unwrap();
    }
}

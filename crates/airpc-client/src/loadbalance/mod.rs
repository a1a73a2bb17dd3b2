//! Endpoint selection strategies.
//!
//! Strategies implement [`LoadBalancer`] and are obtained by name from a
//! [`LoadBalancerFactory`], which hands out one shared instance per name.
//! Built-ins: `"random"` and `"aipredictive"`.

pub mod collector;
pub mod predictive;
pub mod random;

pub use collector::{EndpointMetrics, MetricsCollector};
pub use predictive::PredictiveLoadBalancer;
pub use random::RandomLoadBalancer;

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use airpc_common::{Result, RpcError};

#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Pick one endpoint for a call to `service`, or `None` when the list
    /// is empty.
    async fn select(&self, service: &str, endpoints: &[SocketAddr]) -> Option<SocketAddr>;
}

/// Hands out load balancers by strategy name.
///
/// Instances are cached: asking twice for the same name returns the same
/// shared strategy. User strategies can be registered under custom names
/// before first use.
pub struct LoadBalancerFactory {
    predictor_url: String,
    collector: Arc<MetricsCollector>,
    instances: Mutex<HashMap<String, Arc<dyn LoadBalancer>>>,
}

impl LoadBalancerFactory {
    pub fn new(predictor_url: impl Into<String>, collector: Arc<MetricsCollector>) -> Self {
        LoadBalancerFactory {
            predictor_url: predictor_url.into(),
            collector,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a user-provided strategy under a name.
    pub fn register(&self, name: impl Into<String>, balancer: Arc<dyn LoadBalancer>) {
        self.instances
            .lock()
            .expect("factory lock poisoned")
            .insert(name.into().to_lowercase(), balancer);
    }

    /// Get (or lazily build) the strategy registered under `name`.
    ///
    /// An empty name selects the `"random"` default; an unknown name is a
    /// configuration error.
    pub fn get(&self, name: &str) -> Result<Arc<dyn LoadBalancer>> {
        let name = if name.is_empty() {
            "random".to_string()
        } else {
            name.to_lowercase()
        };

        let mut instances = self.instances.lock().expect("factory lock poisoned");
        if let Some(instance) = instances.get(&name) {
            return Ok(Arc::clone(instance));
        }

        let built: Arc<dyn LoadBalancer> = match name.as_str() {
            "random" => Arc::new(RandomLoadBalancer),
            "aipredictive" => PredictiveLoadBalancer::start(
                self.predictor_url.clone(),
                Arc::clone(&self.collector),
            )?,
            other => {
                return Err(RpcError::Config(format!(
                    "no load balancer registered under name '{}'",
                    other
                )))
            }
        };
        instances.insert(name, Arc::clone(&built));
        Ok(built)
    }
}

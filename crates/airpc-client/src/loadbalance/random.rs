use async_trait::async_trait;
use rand::Rng;
use std::net::SocketAddr;

use super::LoadBalancer;

/// Uniform random selection.
pub struct RandomLoadBalancer;

#[async_trait]
impl LoadBalancer for RandomLoadBalancer {
    async fn select(&self, _service: &str, endpoints: &[SocketAddr]) -> Option<SocketAddr> {
        if endpoints.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..endpoints.len());
        Some(endpoints[idx])
    }
}

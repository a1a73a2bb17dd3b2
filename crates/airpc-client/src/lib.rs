//! airpc client: the resilience and routing core.
//!
//! Calls from a consumer are dispatched to one of many dynamically
//! discovered endpoints through a pipeline that combines four cooperating
//! subsystems:
//!
//! 1. A **predictive, weight-driven load balancer** ([`loadbalance`]) fusing
//!    externally supplied health scores with locally observed metrics.
//! 2. A **per-endpoint circuit breaker** ([`breaker`]) with a three-state
//!    machine over sliding-window outcome metrics.
//! 3. An **adaptive timeout** ([`timeout`]) computed from per-endpoint
//!    latency percentiles.
//! 4. A **smart retry** wrapper ([`retry`]) with exponential backoff,
//!    jitter and failure-class classification.
//!
//! The pipeline itself lives in [`client::RpcClient`]: discover → balance →
//! admit → acquire → send → await → record → retry. Connections are pooled
//! per endpoint ([`pool`]) and multiplexed ([`connection`]); requests and
//! responses are correlated by message id.
//!
//! # Example
//!
//! ```no_run
//! use airpc_client::RpcClient;
//! use airpc_common::{StaticRegistry, Value};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> airpc_common::Result<()> {
//! let registry = Arc::new(
//!     StaticRegistry::new().with_service("com.example.Hello", vec!["127.0.0.1:9001".parse().unwrap()]),
//! );
//! let client = RpcClient::builder(registry).build()?;
//!
//! let result = client
//!     .call(
//!         "com.example.Hello",
//!         "greet",
//!         vec!["String".to_string()],
//!         vec![Value::from("world")],
//!     )
//!     .await?;
//! println!("{:?}", result);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod client;
pub mod connection;
pub mod loadbalance;
pub mod metrics;
pub mod pool;
pub mod proxy;
pub mod retry;
pub mod timeout;
pub mod tls;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{RpcClient, RpcClientBuilder};
pub use connection::Connection;
pub use loadbalance::{
    LoadBalancer, LoadBalancerFactory, MetricsCollector, PredictiveLoadBalancer,
    RandomLoadBalancer,
};
pub use metrics::{ClientMetrics, ServiceMetrics};
pub use pool::{EndpointPool, PoolConfig, PoolManager, PooledConnection};
pub use retry::{BackoffStrategy, RetryConfig};
pub use timeout::{AdaptiveTimeout, AdaptiveTimeoutConfig, LatencyStats, TimeoutRegistry};

//! The call pipeline.
//!
//! For each invocation: discover endpoints, ask the load balancer for one,
//! check the endpoint's circuit breaker, acquire a pooled connection, write
//! the framed request and await the correlated response under the adaptive
//! deadline. Every terminated attempt feeds the breaker and (on success) the
//! adaptive timeout. A retry wrapper re-enters the whole pipeline with
//! exponential backoff, so a retried attempt may land on a different
//! endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use airpc_common::{
    endpoint_key, next_message_id, Registry, Result, RpcConfig, RpcError, RpcMessage, RpcRequest,
    SerializerKind, Value,
};

use crate::breaker::{BreakerRegistry, CircuitBreakerConfig};
use crate::loadbalance::{LoadBalancer, LoadBalancerFactory, MetricsCollector};
use crate::metrics::ClientMetrics;
use crate::pool::{PoolConfig, PoolManager};
use crate::retry::{self, BackoffStrategy, RetryConfig};
use crate::timeout::{AdaptiveTimeoutConfig, TimeoutRegistry};

/// The resilience-wrapped RPC client.
///
/// Cheap to clone behind an [`Arc`]; all internal state (pools, breakers,
/// adaptive timeouts, balancer) is shared.
pub struct RpcClient {
    registry: Arc<dyn Registry>,
    balancer: Arc<dyn LoadBalancer>,
    pools: Arc<PoolManager>,
    breakers: Arc<BreakerRegistry>,
    timeouts: Arc<TimeoutRegistry>,
    retry_config: RetryConfig,
    backoff: BackoffStrategy,
    metrics: Arc<ClientMetrics>,
    serializer: SerializerKind,
    default_timeout: Duration,
}

impl RpcClient {
    pub fn builder(registry: Arc<dyn Registry>) -> RpcClientBuilder {
        RpcClientBuilder::new(registry)
    }

    /// Invoke `service.method(params)` with retry, circuit breaking and the
    /// adaptive deadline.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        param_types: Vec<String>,
        params: Vec<Value>,
    ) -> Result<Value> {
        let mut last_error: Option<RpcError> = None;

        for attempt in 0..self.retry_config.max_attempts {
            if attempt > 0 {
                info!(
                    attempt,
                    max_attempts = self.retry_config.max_attempts,
                    service,
                    method,
                    "retrying call"
                );
                self.metrics.record_retry(service);
            }

            match self.invoke_once(service, method, &param_types, &params).await {
                Ok(value) => return Ok(value),
                Err(err @ RpcError::CircuitOpen { .. }) => {
                    // admission refusal: propagate immediately, no backoff
                    self.metrics.record_circuit_open(service);
                    return Err(err);
                }
                Err(err) => {
                    if !retry::is_retryable(&err, &self.retry_config) {
                        return Err(err);
                    }
                    last_error = Some(err);
                    if attempt + 1 < self.retry_config.max_attempts {
                        let delay = self.backoff.calculate_delay(attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| RpcError::Connection("no attempt was executed".to_string()));
        Err(RpcError::RetryExhausted {
            attempts: self.retry_config.max_attempts,
            source: Box::new(source),
        })
    }

    /// One pipeline pass without retry.
    async fn invoke_once(
        &self,
        service: &str,
        method: &str,
        param_types: &[String],
        params: &[Value],
    ) -> Result<Value> {
        let endpoints = self.registry.discover(service).await?;
        if endpoints.is_empty() {
            return Err(RpcError::NoProvider(service.to_string()));
        }

        let addr = self
            .balancer
            .select(service, &endpoints)
            .await
            .ok_or_else(|| RpcError::NoProvider(service.to_string()))?;

        let key = endpoint_key(service, &addr);
        let breaker = self.breakers.get_or_create(&key);
        let adaptive = self.timeouts.get_or_create(&key);

        if !breaker.allow_request() {
            // a refused admission does not touch the metrics window
            return Err(RpcError::CircuitOpen {
                name: key,
                state: breaker.state().as_str(),
            });
        }

        let started = Instant::now();
        let result = self
            .dispatch(addr, service, method, param_types, params, &adaptive)
            .await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                breaker.record_success(elapsed);
                adaptive.record_latency(elapsed);
                self.metrics.record_success(service, elapsed);
            }
            Err(_) => {
                breaker.record_failure();
                self.metrics.record_failure(service);
            }
        }

        result
    }

    /// Acquire, send, await. The pooled connection is a scope guard, so it
    /// returns to the pool on every exit path.
    async fn dispatch(
        &self,
        addr: SocketAddr,
        service: &str,
        method: &str,
        param_types: &[String],
        params: &[Value],
        adaptive: &crate::timeout::AdaptiveTimeout,
    ) -> Result<Value> {
        let pool = self.pools.get_or_create(addr);
        let conn = pool.acquire().await?;

        let request = RpcRequest::new(service, method, param_types.to_vec(), params.to_vec());
        let msg = RpcMessage::request(next_message_id(), request).with_serializer(self.serializer);
        let msg_id = msg.message_id;

        let completion = conn.call(&msg).await?;

        let deadline = match adaptive.timeout_secs() {
            0 => self.default_timeout,
            secs => Duration::from_secs(secs),
        };

        match tokio::time::timeout(deadline, completion).await {
            Ok(Ok(Ok(response))) => match response.error {
                Some(error) => Err(RpcError::Business(error)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            Ok(Ok(Err(connection_error))) => Err(connection_error),
            Ok(Err(_)) => Err(RpcError::Connection(format!(
                "{}: completion dropped",
                addr
            ))),
            Err(_) => {
                // drop the pending entry so the late response, if it ever
                // arrives, finds nothing and is discarded
                conn.remove_pending(msg_id);
                Err(RpcError::Timeout(deadline.as_millis() as u64))
            }
        }
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn timeouts(&self) -> &Arc<TimeoutRegistry> {
        &self.timeouts
    }

    /// Close all pools. Pending guards drain as they drop.
    pub fn shutdown(&self) {
        self.pools.shutdown();
    }
}

/// Builder wiring the pipeline's collaborators together.
pub struct RpcClientBuilder {
    registry: Arc<dyn Registry>,
    config: RpcConfig,
    pool_config: PoolConfig,
    retry_config: RetryConfig,
    breaker_config: CircuitBreakerConfig,
    timeout_config: AdaptiveTimeoutConfig,
    serializer: SerializerKind,
    balancer_override: Option<Arc<dyn LoadBalancer>>,
}

impl RpcClientBuilder {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        RpcClientBuilder {
            registry,
            config: RpcConfig::default(),
            pool_config: PoolConfig::default(),
            retry_config: RetryConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            timeout_config: AdaptiveTimeoutConfig::default(),
            serializer: SerializerKind::default(),
            balancer_override: None,
        }
    }

    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    pub fn retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn breaker_config(mut self, breaker_config: CircuitBreakerConfig) -> Self {
        self.breaker_config = breaker_config;
        self
    }

    pub fn timeout_config(mut self, timeout_config: AdaptiveTimeoutConfig) -> Self {
        self.timeout_config = timeout_config;
        self
    }

    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    /// Use a specific balancer instance instead of resolving
    /// `config.load_balancer` through the factory.
    pub fn load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.balancer_override = Some(balancer);
        self
    }

    pub fn build(self) -> Result<RpcClient> {
        let breakers = Arc::new(BreakerRegistry::new(self.breaker_config));
        let timeouts = Arc::new(TimeoutRegistry::new(self.timeout_config));
        let collector = Arc::new(MetricsCollector::new(
            Arc::clone(&breakers),
            Arc::clone(&timeouts),
        ));

        let balancer = match self.balancer_override {
            Some(balancer) => balancer,
            None => {
                let factory =
                    LoadBalancerFactory::new(self.config.predictor_url.clone(), collector);
                factory.get(&self.config.load_balancer)?
            }
        };

        Ok(RpcClient {
            registry: self.registry,
            balancer,
            pools: Arc::new(PoolManager::new(self.pool_config)),
            breakers,
            timeouts,
            backoff: BackoffStrategy::new(self.retry_config.clone()),
            retry_config: self.retry_config,
            metrics: Arc::new(ClientMetrics::new()),
            serializer: self.serializer,
            default_timeout: self.config.request_timeout(),
        })
    }
}

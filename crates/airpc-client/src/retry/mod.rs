//! Smart retry policy.
//!
//! Failures are classified by behavioral kind ([`is_retryable`]); delays come
//! from [`BackoffStrategy`]. The call pipeline drives the loop itself so a
//! retried attempt re-enters discovery and may land on a different endpoint.

pub mod backoff;

pub use backoff::BackoffStrategy;

use airpc_common::RpcError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay used as the jitter band.
    pub jitter_factor: f64,
    /// Whether elapsed deadlines are worth another attempt.
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.5,
            retry_on_timeout: true,
        }
    }
}

/// Decide whether a failed attempt should be retried.
///
/// Circuit-open rejections are never retried: the breaker already knows the
/// endpoint is bad and hammering it defeats the cool-down. Connection-level
/// failures are transient by assumption. Unrecognized errors are probed for
/// a nested IO cause before being declared permanent.
pub fn is_retryable(error: &RpcError, config: &RetryConfig) -> bool {
    match error {
        RpcError::CircuitOpen { .. } => false,
        RpcError::ConnectionRefused(_) => true,
        RpcError::Timeout(_) => config.retry_on_timeout,
        RpcError::Io(_) | RpcError::Connection(_) => true,
        RpcError::RetryExhausted { .. } => false,
        other => {
            let mut cause = std::error::Error::source(other);
            while let Some(err) = cause {
                if err.downcast_ref::<std::io::Error>().is_some() {
                    return true;
                }
                cause = err.source();
            }
            false
        }
    }
}

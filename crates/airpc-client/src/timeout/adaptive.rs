use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::stats::LatencyStats;

#[derive(Debug, Clone)]
pub struct AdaptiveTimeoutConfig {
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub default_timeout: Duration,
    /// Multiplier applied on top of the percentile latency.
    pub safety_factor: f64,
    /// Which percentile drives the timeout.
    pub percentile: f64,
    /// Below this many samples the default timeout is used.
    pub minimum_samples: usize,
    pub sample_window_size: usize,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        AdaptiveTimeoutConfig {
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_millis(30_000),
            default_timeout: Duration::from_millis(10_000),
            safety_factor: 1.5,
            percentile: 99.0,
            minimum_samples: 10,
            sample_window_size: 1000,
        }
    }
}

/// Per-endpoint deadline derived from recent latency percentiles.
///
/// ```text
/// timeout = default                      while samples < minimum
///         = clamp(P99 × 1.5, min, max)   otherwise
/// ```
///
/// The timeout is recomputed synchronously after every recorded sample;
/// readers observe the latest value through an atomic load.
pub struct AdaptiveTimeout {
    name: String,
    config: AdaptiveTimeoutConfig,
    stats: LatencyStats,
    current_timeout_ms: AtomicU64,
}

impl AdaptiveTimeout {
    pub fn new(name: impl Into<String>, config: AdaptiveTimeoutConfig) -> Self {
        AdaptiveTimeout {
            name: name.into(),
            stats: LatencyStats::new(config.sample_window_size),
            current_timeout_ms: AtomicU64::new(config.default_timeout.as_millis() as u64),
            config,
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, AdaptiveTimeoutConfig::default())
    }

    /// Record a successful call latency and recompute the timeout.
    pub fn record_latency(&self, latency: Duration) {
        self.stats.record(latency.as_millis() as u64);
        self.update_timeout();
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.current_timeout_ms.load(Ordering::Acquire))
    }

    pub fn timeout_ms(&self) -> u64 {
        self.current_timeout_ms.load(Ordering::Acquire)
    }

    /// Current timeout in whole seconds, rounded up.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_ms().div_ceil(1000)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &LatencyStats {
        &self.stats
    }

    /// Clear samples and restore the default timeout.
    pub fn reset(&self) {
        self.stats.reset();
        self.current_timeout_ms.store(
            self.config.default_timeout.as_millis() as u64,
            Ordering::Release,
        );
    }

    fn update_timeout(&self) {
        let timeout_ms = if self.stats.sample_count() < self.config.minimum_samples {
            self.config.default_timeout.as_millis() as u64
        } else {
            match self.stats.percentile(self.config.percentile) {
                Some(p) if p > 0 => {
                    let calculated = (p as f64 * self.config.safety_factor) as u64;
                    calculated
                        .max(self.config.min_timeout.as_millis() as u64)
                        .min(self.config.max_timeout.as_millis() as u64)
                }
                _ => self.config.default_timeout.as_millis() as u64,
            }
        };
        self.current_timeout_ms.store(timeout_ms, Ordering::Release);
    }
}

use rand::Rng;
use std::time::Duration;

use super::RetryConfig;

/// Retry delay computation: exponential backoff with jitter.
///
/// ```text
/// d     = base × multiplier^attempt, capped at max
/// delay = max(0, round(d + d × jitter_factor × U[-1, +1)))
/// ```
pub struct BackoffStrategy {
    config: RetryConfig,
}

impl BackoffStrategy {
    pub fn new(config: RetryConfig) -> Self {
        BackoffStrategy { config }
    }

    /// Delay before the next retry; `attempt` is 0-based.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let mut delay =
            self.config.base_delay_ms as f64 * self.config.multiplier.powi(attempt as i32);
        delay = delay.min(self.config.max_delay_ms as f64);

        if self.config.jitter_factor > 0.0 {
            let jitter = delay * self.config.jitter_factor;
            delay += rand::thread_rng().gen_range(-jitter..jitter);
        }

        Duration::from_millis(delay.round().max(0.0) as u64)
    }

    /// Full jitter (AWS style): `U[0, min(max, base × multiplier^attempt))`.
    pub fn calculate_delay_full_jitter(&self, attempt: u32) -> Duration {
        let cap = (self.config.base_delay_ms as f64 * self.config.multiplier.powi(attempt as i32))
            .min(self.config.max_delay_ms as f64) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..cap.max(1)))
    }

    /// Decorrelated jitter: `U[base, min(max, 3 × previous))`.
    pub fn calculate_delay_decorrelated(&self, previous: Duration) -> Duration {
        let min_delay = self.config.base_delay_ms;
        let max_delay = self
            .config
            .max_delay_ms
            .min((previous.as_millis() as u64).saturating_mul(3));
        if max_delay <= min_delay {
            return Duration::from_millis(min_delay);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_delay..max_delay))
    }
}

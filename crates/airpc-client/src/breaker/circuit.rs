use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use super::window::SlidingWindow;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation, every call is admitted.
    Closed = 0,
    /// Tripped: calls are rejected until the cool-down elapses.
    Open = 1,
    /// Probing: a limited number of calls are admitted to test recovery.
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure-rate percentage at which a closed circuit trips.
    pub failure_rate_threshold: f32,
    /// Slow-call-rate percentage at which a closed circuit trips.
    pub slow_call_rate_threshold: f32,
    /// Calls at least this long count as slow.
    pub slow_call_duration_threshold: Duration,
    /// Cool-down before an open circuit admits a probe.
    pub wait_duration_in_open: Duration,
    /// Count-based window size for outcome metrics.
    pub sliding_window_size: u32,
    /// Below this many recorded calls the circuit never trips.
    pub minimum_number_of_calls: u32,
    /// Probe budget while half-open.
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_millis(3000),
            wait_duration_in_open: Duration::from_millis(30_000),
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            permitted_calls_in_half_open: 5,
        }
    }
}

/// Per-endpoint circuit breaker with sliding-window metrics.
///
/// State reads and transitions use atomics; all public operations are safe
/// under concurrent use.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    /// Milliseconds since `created` at the last state transition.
    last_transition_ms: AtomicU64,
    created: Instant,
    metrics: SlidingWindow,
    half_open_calls: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            last_transition_ms: AtomicU64::new(0),
            created: Instant::now(),
            metrics: SlidingWindow::new(config.sliding_window_size),
            half_open_calls: AtomicU32::new(0),
            config,
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Admission decision for one call.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.open_cooldown_elapsed() {
                    self.transition_to(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let taken = self.half_open_calls.fetch_add(1, Ordering::Relaxed) + 1;
                taken <= self.config.permitted_calls_in_half_open
            }
        }
    }

    /// Record a successful call and its duration.
    pub fn record_success(&self, duration: Duration) {
        let slow = duration >= self.config.slow_call_duration_threshold;
        self.metrics.record_success(slow);

        if self.state() == CircuitState::HalfOpen && self.should_close() {
            self.transition_to(CircuitState::Closed);
            self.metrics.reset();
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.metrics.record_failure();

        match self.state() {
            CircuitState::Closed => {
                if self.should_open() {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &SlidingWindow {
        &self.metrics
    }

    /// Force a state, bypassing the transition rules. Forcing `Closed`
    /// additionally resets the metrics window. For tests.
    pub fn force_state(&self, state: CircuitState) {
        self.transition_to(state);
        if state == CircuitState::Closed {
            self.metrics.reset();
        }
    }

    fn should_open(&self) -> bool {
        if self.metrics.total_calls() < self.config.minimum_number_of_calls {
            return false;
        }
        self.metrics.failure_rate() >= self.config.failure_rate_threshold
            || self.metrics.slow_call_rate() >= self.config.slow_call_rate_threshold
    }

    fn should_close(&self) -> bool {
        if self.half_open_calls.load(Ordering::Relaxed) < self.config.permitted_calls_in_half_open {
            return false;
        }
        self.metrics.failure_rate() < self.config.failure_rate_threshold
    }

    fn open_cooldown_elapsed(&self) -> bool {
        let elapsed_ms = (self.created.elapsed().as_millis() as u64)
            .saturating_sub(self.last_transition_ms.load(Ordering::Acquire));
        elapsed_ms >= self.config.wait_duration_in_open.as_millis() as u64
    }

    fn transition_to(&self, new_state: CircuitState) {
        let old = CircuitState::from_u8(self.state.swap(new_state as u8, Ordering::AcqRel));
        if old != new_state {
            self.last_transition_ms
                .store(self.created.elapsed().as_millis() as u64, Ordering::Release);
            if new_state == CircuitState::HalfOpen {
                self.half_open_calls.store(0, Ordering::Relaxed);
            }
            info!(
                breaker = %self.name,
                from = old.as_str(),
                to = new_state.as_str(),
                "circuit breaker state transition"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(wait_ms: u64, min_calls: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            wait_duration_in_open: Duration::from_millis(wait_ms),
            minimum_number_of_calls: min_calls,
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_closed_and_admits() {
        let breaker = CircuitBreaker::with_defaults("svc@127.0.0.1:9001");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("b", config(100, 5));
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_never_trips_below_minimum_calls() {
        let breaker = CircuitBreaker::new("b", config(100, 10));
        for _ in 0..9 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejects_while_cooldown_pending() {
        let breaker = CircuitBreaker::new("b", config(60_000, 5));
        for _ in 0..5 {
            breaker.record_failure();
        }
        for _ in 0..20 {
            assert!(!breaker.allow_request());
        }
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new("b", config(100, 5));
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(150));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_budget() {
        let breaker = CircuitBreaker::with_defaults("b");
        breaker.force_state(CircuitState::HalfOpen);

        for _ in 0..5 {
            assert!(breaker.allow_request());
        }
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_half_open_closes_after_successful_probes() {
        let breaker = CircuitBreaker::with_defaults("b");
        breaker.force_state(CircuitState::HalfOpen);

        for _ in 0..5 {
            assert!(breaker.allow_request());
            breaker.record_success(Duration::from_millis(10));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        // metrics were reset on close
        assert_eq!(breaker.metrics().total_calls(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::with_defaults("b");
        breaker.force_state(CircuitState::HalfOpen);

        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_slow_calls_trip_the_circuit() {
        let breaker = CircuitBreaker::new(
            "b",
            CircuitBreakerConfig {
                slow_call_rate_threshold: 50.0,
                minimum_number_of_calls: 4,
                ..Default::default()
            },
        );

        // slow successes alone must be able to open the circuit
        for _ in 0..4 {
            breaker.record_success(Duration::from_millis(5000));
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_force_closed_resets_metrics() {
        let breaker = CircuitBreaker::with_defaults("b");
        for _ in 0..10 {
            breaker.record_failure();
        }
        breaker.force_state(CircuitState::Closed);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_calls(), 0);
    }

    #[test]
    fn test_concurrent_admission_is_safe() {
        use std::sync::Arc;
        use std::thread;

        let breaker = Arc::new(CircuitBreaker::with_defaults("b"));
        let mut handles = vec![];
        for _ in 0..8 {
            let breaker = Arc::clone(&breaker);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    if breaker.allow_request() {
                        if i % 4 == 0 {
                            breaker.record_failure();
                        } else {
                            breaker.record_success(Duration::from_millis(1));
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

use std::sync::atomic::{AtomicU32, Ordering};

/// Count-based sliding window over call outcomes.
///
/// Tracks `(total, failed, slow)` counters. A failure does not count toward
/// the slow-call counter. When the total exceeds the window size the
/// counters are scaled down proportionally, which preserves the observed
/// rates without keeping per-call history.
#[derive(Debug)]
pub struct SlidingWindow {
    window_size: u32,
    total_calls: AtomicU32,
    failed_calls: AtomicU32,
    slow_calls: AtomicU32,
}

impl SlidingWindow {
    pub fn new(window_size: u32) -> Self {
        SlidingWindow {
            window_size,
            total_calls: AtomicU32::new(0),
            failed_calls: AtomicU32::new(0),
            slow_calls: AtomicU32::new(0),
        }
    }

    pub fn record_success(&self, slow: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if slow {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.trim();
    }

    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        self.trim();
    }

    /// Failure rate as a percentage in `[0, 100]`.
    pub fn failure_rate(&self) -> f32 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failed_calls.load(Ordering::Relaxed) as f32 * 100.0 / total as f32
    }

    /// Slow-call rate as a percentage in `[0, 100]`.
    pub fn slow_call_rate(&self) -> f32 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.slow_calls.load(Ordering::Relaxed) as f32 * 100.0 / total as f32
    }

    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub fn failed_calls(&self) -> u32 {
        self.failed_calls.load(Ordering::Relaxed)
    }

    pub fn slow_calls(&self) -> u32 {
        self.slow_calls.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.slow_calls.store(0, Ordering::Relaxed);
    }

    /// Scale counters down so `total == window_size`, preserving rates.
    fn trim(&self) {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total > self.window_size {
            let ratio = self.window_size as f32 / total as f32;
            let failed = self.failed_calls.load(Ordering::Relaxed);
            let slow = self.slow_calls.load(Ordering::Relaxed);
            self.failed_calls
                .store((failed as f32 * ratio) as u32, Ordering::Relaxed);
            self.slow_calls
                .store((slow as f32 * ratio) as u32, Ordering::Relaxed);
            self.total_calls.store(self.window_size, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_rates_are_zero() {
        let window = SlidingWindow::new(100);
        assert_eq!(window.failure_rate(), 0.0);
        assert_eq!(window.slow_call_rate(), 0.0);
        assert_eq!(window.total_calls(), 0);
    }

    #[test]
    fn test_failure_rate() {
        let window = SlidingWindow::new(100);
        for _ in 0..6 {
            window.record_success(false);
        }
        for _ in 0..4 {
            window.record_failure();
        }
        assert_eq!(window.total_calls(), 10);
        assert!((window.failure_rate() - 40.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_failure_does_not_count_as_slow() {
        let window = SlidingWindow::new(100);
        window.record_failure();
        window.record_success(true);
        assert_eq!(window.slow_calls(), 1);
        assert_eq!(window.failed_calls(), 1);
        assert!((window.slow_call_rate() - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_trim_preserves_rates() {
        let window = SlidingWindow::new(100);
        // 150 calls, half failures
        for _ in 0..75 {
            window.record_success(false);
            window.record_failure();
        }
        assert_eq!(window.total_calls(), 100);
        // Proportional scaling keeps the rate near 50%
        assert!((window.failure_rate() - 50.0).abs() < 2.0);
    }

    #[test]
    fn test_invariant_counters_bounded_by_window() {
        let window = SlidingWindow::new(50);
        for i in 0..500 {
            if i % 3 == 0 {
                window.record_failure();
            } else {
                window.record_success(i % 7 == 0);
            }
            assert!(window.total_calls() <= 50);
            assert!(window.failed_calls() <= window.total_calls());
            assert!(window.slow_calls() <= window.total_calls());
        }
    }

    #[test]
    fn test_reset() {
        let window = SlidingWindow::new(100);
        window.record_failure();
        window.record_success(true);
        window.reset();
        assert_eq!(window.total_calls(), 0);
        assert_eq!(window.failure_rate(), 0.0);
        assert_eq!(window.slow_call_rate(), 0.0);
    }
}

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Fixed-capacity ring buffer of latency samples with percentile queries.
///
/// Recording is a pair of relaxed atomic stores and never blocks. Percentile
/// computation copies the active prefix and sorts it; the sort step is
/// guarded by a short lock so concurrent readers do not duplicate work.
pub struct LatencyStats {
    samples: Vec<AtomicU64>,
    capacity: usize,
    index: AtomicU64,
    count: AtomicUsize,
    sort_lock: Mutex<()>,
}

impl LatencyStats {
    pub fn new(capacity: usize) -> Self {
        LatencyStats {
            samples: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            capacity,
            index: AtomicU64::new(0),
            count: AtomicUsize::new(0),
            sort_lock: Mutex::new(()),
        }
    }

    /// Record one latency sample in milliseconds.
    pub fn record(&self, latency_ms: u64) {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) as usize % self.capacity;
        self.samples[idx].store(latency_ms, Ordering::Relaxed);
        if self.count.load(Ordering::Relaxed) < self.capacity {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of live samples, `min(recorded, capacity)`.
    pub fn sample_count(&self) -> usize {
        self.count.load(Ordering::Relaxed).min(self.capacity)
    }

    /// Percentile latency in milliseconds, `None` when no samples exist.
    ///
    /// The index is `ceil(p/100 × n) − 1`, clamped into range.
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        let n = self.sample_count();
        if n == 0 {
            return None;
        }

        let _guard = self.sort_lock.lock().expect("sort lock poisoned");
        let mut copy: Vec<u64> = self.samples[..n]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect();
        copy.sort_unstable();

        let idx = ((percentile / 100.0) * n as f64).ceil() as usize;
        let idx = idx.saturating_sub(1).min(n - 1);
        Some(copy[idx])
    }

    pub fn p50(&self) -> Option<u64> {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Option<u64> {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> Option<u64> {
        self.percentile(99.0)
    }

    pub fn average(&self) -> Option<f64> {
        let n = self.sample_count();
        if n == 0 {
            return None;
        }
        let sum: u64 = self.samples[..n]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .sum();
        Some(sum as f64 / n as f64)
    }

    pub fn min(&self) -> Option<u64> {
        let n = self.sample_count();
        if n == 0 {
            return None;
        }
        self.samples[..n]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .min()
    }

    pub fn max(&self) -> Option<u64> {
        let n = self.sample_count();
        if n == 0 {
            return None;
        }
        self.samples[..n]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .max()
    }

    pub fn reset(&self) {
        let _guard = self.sort_lock.lock().expect("sort lock poisoned");
        self.count.store(0, Ordering::Relaxed);
        self.index.store(0, Ordering::Relaxed);
        for sample in &self.samples {
            sample.store(0, Ordering::Relaxed);
        }
    }
}

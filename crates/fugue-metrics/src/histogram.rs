//! Duration histogram

use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram of durations in milliseconds
pub struct Histogram {
    /// Inclusive upper bounds of each bucket
    bounds: Vec<u64>,
    /// One counter per bound plus an overflow bucket
    counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Histogram with buckets suited to task runtimes
    pub fn new() -> Self {
        Self::with_bounds(vec![1, 10, 50, 100, 500, 1_000, 5_000, 30_000, 300_000])
    }

    /// Histogram with custom bucket bounds (sorted ascending)
    pub fn with_bounds(bounds: Vec<u64>) -> Self {
        let counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record an observation
    pub fn observe(&self, value_ms: u64) {
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(value_ms, Ordering::Relaxed);

        let idx = self
            .bounds
            .iter()
            .position(|bound| value_ms <= *bound)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Mean of all observations (0 when empty)
    pub fn mean(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Number of observations
    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Largest observation
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Per-bucket counts; the last entry counts values above every bound
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

//! Latency histograms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default bucket bounds in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0,
];

/// Cumulative histogram over fixed buckets.
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    /// f64 sum stored as bits.
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(name: &'static str) -> Self {
        Self::with_buckets(name, DEFAULT_BUCKETS.to_vec())
    }

    pub fn with_buckets(name: &'static str, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(|a, b| a.total_cmp(b));
        let bucket_counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            name,
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record a value.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        for (upper, count) in self.buckets.iter().zip(&self.bucket_counts) {
            if value <= *upper {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a duration in seconds.
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    /// Start a timer that records when dropped.
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            sum: self.sum(),
            count: self.count(),
        }
    }
}

/// Records the elapsed time into a histogram when dropped.
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl HistogramTimer<'_> {
    /// Record now and return the elapsed time.
    pub fn observe(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.histogram.observe_duration(elapsed);
        std::mem::forget(self);
        elapsed
    }
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe_duration(self.start.elapsed());
    }
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<f64>,
    /// Observations at or below each bucket bound.
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Approximate percentile by linear interpolation inside the bucket.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        let target = (self.count as f64 * p / 100.0).ceil() as u64;
        let mut prev_count = 0;
        let mut prev_bound = 0.0;
        for (bound, &count) in self.buckets.iter().zip(&self.bucket_counts) {
            if count >= target {
                let in_bucket = count - prev_count;
                if in_bucket == 0 {
                    return *bound;
                }
                let position = (target - prev_count) as f64 / in_bucket as f64;
                return prev_bound + position * (bound - prev_bound);
            }
            prev_count = count;
            prev_bound = *bound;
        }
        self.buckets.last().copied().unwrap_or(0.0)
    }
}

//! Metrics for the simulated cluster.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      NetworkMetrics                        │
//! │  ┌──────────────┐  ┌────────────────┐  ┌───────────────┐  │
//! │  │  Counters    │  │ Labeled errors │  │  Histograms   │  │
//! │  │ - puts/gets  │  │ - routing      │  │ - put latency │  │
//! │  │ - retries    │  │ - consensus    │  │ - get latency │  │
//! │  │ - events     │  │ - storage      │  │               │  │
//! │  └──────────────┘  └────────────────┘  └───────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod histograms;

pub use counters::{Counter, LabeledCounter};
pub use histograms::{Histogram, HistogramSnapshot, HistogramTimer, DEFAULT_BUCKETS};

use crate::error::Error;
use serde::Serialize;

/// Guards against division by zero in [`distribution_skew`].
const SKEW_EPSILON: f64 = 0.0001;

/// Counters and latencies for a cluster.
#[derive(Debug)]
pub struct NetworkMetrics {
    pub put_total: Counter,
    pub put_failures: Counter,
    pub get_total: Counter,
    pub get_failures: Counter,
    /// Routing attempts that failed and were retried.
    pub route_retries: Counter,
    pub consensus_timeouts: Counter,
    pub quorum_failures: Counter,
    pub events_applied: Counter,
    pub events_expired: Counter,
    /// Failed operations by error kind.
    pub errors: LabeledCounter,
    pub put_latency: Histogram,
    pub get_latency: Histogram,
}

impl NetworkMetrics {
    pub fn new() -> Self {
        Self {
            put_total: Counter::new("network_put_total", "Total PUT requests"),
            put_failures: Counter::new("network_put_failures", "Failed PUT requests"),
            get_total: Counter::new("network_get_total", "Total GET requests"),
            get_failures: Counter::new("network_get_failures", "Failed GET requests"),
            route_retries: Counter::new("network_route_retries", "Retried routing attempts"),
            consensus_timeouts: Counter::new(
                "consensus_timeouts_total",
                "Phases that timed out waiting for a quorum",
            ),
            quorum_failures: Counter::new(
                "consensus_quorum_failures_total",
                "Phases rejected by too many peers",
            ),
            events_applied: Counter::new("clock_events_applied", "Failure events applied"),
            events_expired: Counter::new("clock_events_expired", "Failure events expired"),
            errors: LabeledCounter::new("network_errors_total", "kind"),
            put_latency: Histogram::new("network_put_latency_seconds"),
            get_latency: Histogram::new("network_get_latency_seconds"),
        }
    }

    /// Record a client write. Latency is timed separately through `put_latency`.
    pub fn record_put(&self, error: Option<&Error>) {
        self.put_total.inc();
        if let Some(err) = error {
            self.put_failures.inc();
            self.errors.inc(error_kind(err));
        }
    }

    /// Record a client read.
    pub fn record_get(&self, error: Option<&Error>) {
        self.get_total.inc();
        if let Some(err) = error {
            self.get_failures.inc();
            self.errors.inc(error_kind(err));
        }
    }

    pub fn record_route_retry(&self) {
        self.route_retries.inc();
    }

    pub fn record_consensus_timeout(&self) {
        self.consensus_timeouts.inc();
    }

    pub fn record_quorum_failure(&self) {
        self.quorum_failures.inc();
    }

    pub fn record_event_applied(&self) {
        self.events_applied.inc();
    }

    pub fn record_event_expired(&self) {
        self.events_expired.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            put_total: self.put_total.get(),
            put_failures: self.put_failures.get(),
            get_total: self.get_total.get(),
            get_failures: self.get_failures.get(),
            route_retries: self.route_retries.get(),
            consensus_timeouts: self.consensus_timeouts.get(),
            quorum_failures: self.quorum_failures.get(),
            events_applied: self.events_applied.get(),
            events_expired: self.events_expired.get(),
            put_latency: self.put_latency.snapshot(),
            get_latency: self.get_latency.snapshot(),
        }
    }
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`NetworkMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub put_total: u64,
    pub put_failures: u64,
    pub get_total: u64,
    pub get_failures: u64,
    pub route_retries: u64,
    pub consensus_timeouts: u64,
    pub quorum_failures: u64,
    pub events_applied: u64,
    pub events_expired: u64,
    pub put_latency: HistogramSnapshot,
    pub get_latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    /// Fraction of writes that failed.
    pub fn put_failure_rate(&self) -> f64 {
        if self.put_total == 0 {
            0.0
        } else {
            self.put_failures as f64 / self.put_total as f64
        }
    }

    /// Fraction of reads that failed.
    pub fn get_failure_rate(&self) -> f64 {
        if self.get_total == 0 {
            0.0
        } else {
            self.get_failures as f64 / self.get_total as f64
        }
    }
}

/// How evenly elements are spread across nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Skew {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Mean absolute deviation.
    pub mean_deviation: f64,
    /// `mean_deviation / (std_dev + ε)`.
    pub metric: f64,
}

/// Compute the distribution skew of per-node element counts.
pub fn distribution_skew(counts: &[f64]) -> Skew {
    if counts.is_empty() {
        return Skew {
            mean: 0.0,
            std_dev: 0.0,
            mean_deviation: 0.0,
            metric: 0.0,
        };
    }

    let size = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / size;
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / size;
    let std_dev = variance.sqrt();
    let mean_deviation = counts.iter().map(|c| (c - mean).abs()).sum::<f64>() / size;

    Skew {
        mean,
        std_dev,
        mean_deviation,
        metric: mean_deviation / (std_dev + SKEW_EPSILON),
    }
}

/// Label used for an error in the error counter.
fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Routing(_) => "routing",
        Error::Consensus(_) => "consensus",
        Error::Storage(_) => "storage",
        Error::Put(inner) | Error::Get(inner) => error_kind(inner),
        Error::Config(_) => "config",
        Error::Cancelled => "cancelled",
        Error::Internal(_) => "internal",
    }
}

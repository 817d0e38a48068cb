//! Metric samples and run-wide aggregation
//!
//! Virtual users append to a shared [`MetricsCollector`]; counters are atomics and
//! the duration buffer sits behind a short-lived lock, so users never wait on
//! each other's requests. Once every user has stopped, [`MetricsCollector::snapshot`]
//! produces the read-only [`AggregateMetrics`] that thresholds are evaluated on.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::checks::CheckResults;
use crate::executor::RequestOutcome;

/// Request duration in milliseconds
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// 1.0 for a failed request, 0.0 otherwise
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Completed default-function iterations
pub const ITERATIONS: &str = "iterations";
/// 1.0 per passing check evaluation, 0.0 per failing one
pub const CHECKS: &str = "checks";

/// Single named measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Duration and failure samples for one outcome
    pub fn from_outcome(outcome: &RequestOutcome, failed: bool) -> [MetricSample; 2] {
        [
            Self::new(HTTP_REQ_DURATION, outcome.elapsed_ms),
            Self::new(HTTP_REQ_FAILED, if failed { 1.0 } else { 0.0 }),
        ]
    }
}

/// Pass/fail counts of one named check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

impl CheckTally {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// Concurrent accumulator for the measurement window
#[derive(Debug, Default)]
pub struct MetricsCollector {
    durations: Mutex<Vec<f64>>,
    failed_samples: AtomicU64,
    failed: AtomicU64,
    iterations: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    checks: Mutex<IndexMap<String, CheckTally>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the aggregate; unknown names are ignored
    pub fn record(&self, sample: &MetricSample) {
        match sample.name.as_str() {
            HTTP_REQ_DURATION => self.durations.lock().push(sample.value),
            HTTP_REQ_FAILED => {
                self.failed_samples.fetch_add(1, Ordering::Relaxed);
                if sample.value != 0.0 {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            ITERATIONS => {
                self.iterations
                    .fetch_add(sample.value.max(0.0) as u64, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Record every sample an outcome produces
    pub fn record_outcome(&self, outcome: &RequestOutcome, failed: bool) {
        for sample in MetricSample::from_outcome(outcome, failed) {
            self.record(&sample);
        }
        self.bytes_sent
            .fetch_add(outcome.bytes_sent, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(outcome.bytes_received, Ordering::Relaxed);
    }

    pub fn record_checks(&self, results: &CheckResults) {
        if results.is_empty() {
            return;
        }
        let mut checks = self.checks.lock();
        for (name, passed) in results.iter() {
            let tally = checks.entry(name.to_string()).or_default();
            if passed {
                tally.passes += 1;
            } else {
                tally.fails += 1;
            }
        }
    }

    pub fn record_iteration(&self) {
        self.record(&MetricSample::new(ITERATIONS, 1.0));
    }

    /// Declare checks up front so they are reported even if never evaluated
    pub fn register_checks<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut checks = self.checks.lock();
        for name in names {
            checks.entry(name.to_string()).or_default();
        }
    }

    /// Settled, sorted view of everything recorded so far
    pub fn snapshot(&self) -> AggregateMetrics {
        let mut durations = self.durations.lock().clone();
        durations.sort_by(|a, b| a.total_cmp(b));

        AggregateMetrics {
            durations_ms: durations,
            failed_samples: self.failed_samples.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            iterations: self.iterations.load(Ordering::Acquire),
            bytes_sent: self.bytes_sent.load(Ordering::Acquire),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            checks: self.checks.lock().clone(),
        }
    }
}

/// Read-only aggregate over one measurement window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateMetrics {
    durations_ms: Vec<f64>,
    failed_samples: u64,
    failed: u64,
    iterations: u64,
    bytes_sent: u64,
    bytes_received: u64,
    checks: IndexMap<String, CheckTally>,
}

impl AggregateMetrics {
    /// Build directly from duration and failure samples
    pub fn from_samples(durations_ms: &[f64], failures: &[bool]) -> Self {
        let collector = MetricsCollector::new();
        for duration in durations_ms {
            collector.record(&MetricSample::new(HTTP_REQ_DURATION, *duration));
        }
        for failed in failures {
            collector.record(&MetricSample::new(
                HTTP_REQ_FAILED,
                if *failed { 1.0 } else { 0.0 },
            ));
        }
        collector.snapshot()
    }

    /// Number of request duration samples
    pub fn count(&self) -> u64 {
        self.durations_ms.len() as u64
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Fraction of `http_req_failed` samples that were failures
    pub fn failure_rate(&self) -> f64 {
        if self.failed_samples == 0 {
            0.0
        } else {
            self.failed as f64 / self.failed_samples as f64
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn checks(&self) -> &IndexMap<String, CheckTally> {
        &self.checks
    }

    /// Fraction of passing check evaluations
    pub fn checks_rate(&self) -> f64 {
        let (passes, total) = self
            .checks
            .values()
            .fold((0, 0), |(p, t), tally| (p + tally.passes, t + tally.total()));
        if total == 0 {
            0.0
        } else {
            passes as f64 / total as f64
        }
    }

    pub fn checks_total(&self) -> u64 {
        self.checks.values().map(CheckTally::total).sum()
    }

    /// Sorted request durations
    pub fn durations_ms(&self) -> &[f64] {
        &self.durations_ms
    }

    pub fn min(&self) -> Option<f64> {
        self.durations_ms.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.durations_ms.last().copied()
    }

    pub fn avg(&self) -> Option<f64> {
        if self.durations_ms.is_empty() {
            return None;
        }
        Some(self.durations_ms.iter().sum::<f64>() / self.durations_ms.len() as f64)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Nearest-rank percentile of request durations
    pub fn percentile(&self, p: f64) -> Option<f64> {
        nearest_rank(&self.durations_ms, p)
    }
}

const RANK_EPSILON: f64 = 1e-9;

/// Value at rank `ceil(p / 100 * N)` of an ascending slice, rank clamped to `[1, N]`
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !p.is_finite() {
        return None;
    }
    let n = sorted.len();
    let raw = p * n as f64 / 100.0;
    // decimal p is not exact in binary, snap near-integral ranks before ceil
    let nearest = raw.round();
    let rank = if (raw - nearest).abs() < RANK_EPSILON {
        nearest
    } else {
        raw.ceil()
    };
    let rank = if rank < 1.0 { 1 } else { (rank as usize).min(n) };
    Some(sorted[rank - 1])
}

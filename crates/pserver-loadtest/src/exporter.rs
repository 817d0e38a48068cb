//! Prometheus text exposition of a finished run

use std::collections::HashMap;
use std::path::Path;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::{LoadTestError, Result};
use crate::metrics::AggregateMetrics;

/// Metric name prefix
pub const NAMESPACE: &str = "loadtest";

/// Histogram buckets for request durations, in milliseconds
pub const DURATION_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 70.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 3000.0, 5000.0, 10000.0,
];

fn counter(registry: &Registry, name: &str, help: &str, value: u64) -> Result<()> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    counter.inc_by(value);
    registry.register(Box::new(counter))?;
    Ok(())
}

/// Render the aggregate in the Prometheus text format
pub fn render(aggregate: &AggregateMetrics, workload: &str) -> Result<String> {
    let labels = HashMap::from([("workload".to_string(), workload.to_string())]);
    let registry = Registry::new_custom(Some(NAMESPACE.to_string()), Some(labels))?;

    counter(&registry, "http_reqs_total", "Requests issued in the measurement window", aggregate.count())?;
    counter(&registry, "http_req_failed_total", "Failed requests", aggregate.failed())?;
    counter(&registry, "iterations_total", "Completed iterations", aggregate.iterations())?;
    counter(&registry, "data_sent_bytes_total", "Request body bytes sent", aggregate.bytes_sent())?;
    counter(
        &registry,
        "data_received_bytes_total",
        "Response body bytes received",
        aggregate.bytes_received(),
    )?;

    let durations = Histogram::with_opts(
        HistogramOpts::new("http_req_duration_ms", "Request duration in milliseconds")
            .buckets(DURATION_BUCKETS_MS.to_vec()),
    )?;
    for duration in aggregate.durations_ms() {
        durations.observe(*duration);
    }
    registry.register(Box::new(durations))?;

    let checks = IntCounterVec::new(
        Opts::new("checks_total", "Check evaluations by outcome"),
        &["check", "result"],
    )?;
    for (name, tally) in aggregate.checks() {
        checks.with_label_values(&[name.as_str(), "pass"]).inc_by(tally.passes);
        checks.with_label_values(&[name.as_str(), "fail"]).inc_by(tally.fails);
    }
    registry.register(Box::new(checks))?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| LoadTestError::Export(prometheus::Error::Msg(e.to_string())))
}

/// Render and write to `path`
pub fn write(aggregate: &AggregateMetrics, workload: &str, path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, render(aggregate, workload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{evaluate, CheckSpec};
    use crate::executor::RequestOutcome;
    use crate::metrics::MetricsCollector;

    #[test]
    fn test_render_counts() {
        let collector = MetricsCollector::new();
        let checks = vec![CheckSpec::status_is(200)];
        for status in [200, 200, 500] {
            let outcome = RequestOutcome::response(status, "", 42.0);
            collector.record_outcome(&outcome, status != 200);
            collector.record_checks(&evaluate(&outcome, &checks));
            collector.record_iteration();
        }

        let text = render(&collector.snapshot(), "read").unwrap();
        assert!(text.contains("loadtest_http_reqs_total{workload=\"read\"} 3"));
        assert!(text.contains("loadtest_http_req_failed_total{workload=\"read\"} 1"));
        assert!(text.contains("loadtest_iterations_total{workload=\"read\"} 3"));
        assert!(text.contains("loadtest_http_req_duration_ms_count{workload=\"read\"} 3"));
        assert!(text.contains("check=\"status was 200\""));
    }

    #[test]
    fn test_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write(&AggregateMetrics::default(), "write", &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("loadtest_http_reqs_total{workload=\"write\"} 0"));
    }
}

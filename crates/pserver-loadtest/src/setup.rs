//! One-shot warmup before the measurement window
//!
//! Setup outcomes are inspected and logged but never reach the
//! [`crate::metrics::MetricsCollector`] of the run.

use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::executor::RequestOutcome;

/// What the setup phase did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_secs: f64,
    #[serde(skip)]
    pub outcomes: Vec<RequestOutcome>,
}

/// Run `work` exactly `count` times, sequentially
///
/// A failing iteration (transport error or non-2xx) is logged and the loop
/// carries on; every iteration is always attempted.
pub async fn run_setup<F, Fut>(count: usize, mut work: F) -> SetupReport
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RequestOutcome>,
{
    info!("Setup phase: {} requests", count);
    let start = Instant::now();
    let mut report = SetupReport {
        outcomes: Vec::with_capacity(count),
        ..Default::default()
    };

    for i in 0..count {
        let outcome = work(i).await;
        report.attempted += 1;
        if outcome.is_success_status() {
            report.succeeded += 1;
        } else {
            report.failed += 1;
            error!(
                "Setup request {}/{} failed with status {}: {}",
                i + 1,
                count,
                outcome.status,
                outcome.body_sample()
            );
        }
        report.outcomes.push(outcome);
    }

    report.duration_secs = start.elapsed().as_secs_f64();
    info!(
        "Setup complete: {} succeeded, {} failed in {:.2}s",
        report.succeeded, report.failed, report.duration_secs
    );
    report
}

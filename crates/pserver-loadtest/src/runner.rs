//! Run orchestration and the end-of-run summary

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::{LoadTestError, Result};
use crate::executor::{HttpExecutor, RequestExecutor};
use crate::metrics::{AggregateMetrics, MetricsCollector};
use crate::payload::{RandomSeeds, SeedSource};
use crate::scheduler::{SchedulerReport, UserContext, VirtualUserScheduler};
use crate::setup::SetupReport;
use crate::thresholds::{self, ThresholdReport};
use crate::workload::Workload;

/// Drives setup, measurement and threshold evaluation for one workload
pub struct LoadTestRunner {
    config: RunConfig,
    workload: Arc<dyn Workload>,
    executor: Arc<dyn RequestExecutor>,
    seeds: Arc<dyn SeedSource>,
}

impl LoadTestRunner {
    /// Runner issuing real HTTP requests
    pub fn new(config: RunConfig, workload: Arc<dyn Workload>) -> Result<Self> {
        let executor = HttpExecutor::new(&config.executor_settings())?;
        Self::with_executor(config, workload, Arc::new(executor))
    }

    /// Fails when `config` was resolved for a different workload
    pub fn with_executor(
        config: RunConfig,
        workload: Arc<dyn Workload>,
        executor: Arc<dyn RequestExecutor>,
    ) -> Result<Self> {
        if config.workload != workload.name() {
            return Err(LoadTestError::Config(format!(
                "run configuration was built for workload {}, not {}",
                config.workload,
                workload.name()
            )));
        }
        Ok(Self {
            config,
            workload,
            executor,
            seeds: Arc::new(RandomSeeds),
        })
    }

    pub fn with_seeds(mut self, seeds: Arc<dyn SeedSource>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Setup once, measure for the configured duration, then evaluate
    pub async fn run(&self) -> CompletedRun {
        let started_at = Utc::now();
        info!(
            "Starting {} load test against {} with {} virtual users for {}s",
            self.workload.name(),
            self.config.target_base_url,
            self.config.virtual_users,
            self.config.duration.as_secs()
        );

        let setup = self
            .workload
            .setup(self.executor.as_ref(), self.seeds.as_ref())
            .await;
        if let Some(report) = &setup {
            if report.failed > 0 {
                warn!("{} of {} setup requests failed", report.failed, report.attempted);
            }
        }

        // the collector only exists from here on, setup traffic cannot reach it
        let collector = Arc::new(MetricsCollector::new());
        collector.register_checks(self.config.checks.iter().map(|c| c.name.as_str()));

        let scheduler = VirtualUserScheduler::new(self.config.virtual_users, self.config.duration);
        let scheduled = scheduler
            .run(UserContext {
                workload: self.workload.clone(),
                executor: self.executor.clone(),
                seeds: self.seeds.clone(),
                checks: self.config.checks.clone().into(),
                collector: collector.clone(),
            })
            .await;

        let aggregate = collector.snapshot();
        let thresholds = thresholds::evaluate(&aggregate, &self.config.thresholds);
        info!(
            "Load test complete: {} requests, {} thresholds {}",
            aggregate.count(),
            thresholds.results.len(),
            if thresholds.all_passed { "passed" } else { "failed" }
        );

        let summary = RunSummary::new(
            self.workload.name(),
            &self.config,
            started_at,
            setup,
            &scheduled,
            &aggregate,
            thresholds,
        );
        CompletedRun { summary, aggregate }
    }
}

/// Summary plus the settled aggregate it was computed from
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub summary: RunSummary,
    pub aggregate: AggregateMetrics,
}

/// Request duration statistics in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
}

impl From<&AggregateMetrics> for LatencySummary {
    fn from(aggregate: &AggregateMetrics) -> Self {
        Self {
            min: aggregate.min(),
            avg: aggregate.avg(),
            med: aggregate.median(),
            p90: aggregate.percentile(90.0),
            p95: aggregate.percentile(95.0),
            p99: aggregate.percentile(99.0),
            max: aggregate.max(),
        }
    }
}

/// Pass/fail totals of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn passed(&self) -> bool {
        self.fails == 0
    }
}

/// End-of-run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workload: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub virtual_users: usize,
    pub duration_secs: f64,
    pub setup: Option<SetupReport>,
    pub iterations: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub failure_rate: f64,
    pub avg_rps: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub latency_ms: LatencySummary,
    pub checks: Vec<CheckSummary>,
    pub thresholds: ThresholdReport,
    pub all_passed: bool,
}

impl RunSummary {
    fn new(
        workload: &str,
        config: &RunConfig,
        started_at: DateTime<Utc>,
        setup: Option<SetupReport>,
        scheduled: &SchedulerReport,
        aggregate: &AggregateMetrics,
        thresholds: ThresholdReport,
    ) -> Self {
        let duration = scheduled.elapsed_secs;
        Self {
            workload: workload.to_string(),
            target: config.target_base_url.clone(),
            started_at,
            finished_at: Utc::now(),
            virtual_users: config.virtual_users,
            duration_secs: duration,
            setup,
            iterations: aggregate.iterations(),
            total_requests: aggregate.count(),
            failed_requests: aggregate.failed(),
            failure_rate: aggregate.failure_rate(),
            avg_rps: if duration > 0.0 {
                aggregate.count() as f64 / duration
            } else {
                0.0
            },
            bytes_sent: aggregate.bytes_sent(),
            bytes_received: aggregate.bytes_received(),
            latency_ms: LatencySummary::from(aggregate),
            checks: aggregate
                .checks()
                .iter()
                .map(|(name, tally)| CheckSummary {
                    name: name.clone(),
                    passes: tally.passes,
                    fails: tally.fails,
                })
                .collect(),
            all_passed: thresholds.all_passed,
            thresholds,
        }
    }

    /// Process exit status: 0 iff every threshold passed
    pub fn exit_code(&self) -> i32 {
        if self.all_passed {
            0
        } else {
            1
        }
    }

    /// Write the summary as pretty JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Print formatted report
    pub fn print_report(&self) {
        let ms = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));

        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                PSERVER API LOAD TEST RESULTS                 ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Workload:          {:>10}                                ║", self.workload);
        println!("║ Virtual Users:     {:>10}                                ║", self.virtual_users);
        println!("║ Duration:          {:>10.2} seconds                        ║", self.duration_secs);
        if let Some(setup) = &self.setup {
            println!(
                "║ Setup Requests:    {:>10} ({} failed)                     ║",
                setup.attempted, setup.failed
            );
        }
        println!("║ Iterations:        {:>10}                                ║", self.iterations);
        println!("║ Total Requests:    {:>10}                                ║", self.total_requests);
        println!("║ Failed:            {:>10}                                ║", self.failed_requests);
        println!("║ Failure Rate:      {:>10.2}%                               ║", self.failure_rate * 100.0);
        println!("║ Avg RPS:           {:>10.2}                                ║", self.avg_rps);
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ http_req_duration (ms)                                       ║");
        println!("║   min:             {:>10}                                ║", ms(self.latency_ms.min));
        println!("║   avg:             {:>10}                                ║", ms(self.latency_ms.avg));
        println!("║   med:             {:>10}                                ║", ms(self.latency_ms.med));
        println!("║   p90:             {:>10}                                ║", ms(self.latency_ms.p90));
        println!("║   p95:             {:>10}                                ║", ms(self.latency_ms.p95));
        println!("║   p99:             {:>10}                                ║", ms(self.latency_ms.p99));
        println!("║   max:             {:>10}                                ║", ms(self.latency_ms.max));
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Bytes Sent:        {:>10}                                ║", self.bytes_sent);
        println!("║ Bytes Received:    {:>10}                                ║", self.bytes_received);
        println!("╚══════════════════════════════════════════════════════════════╝");

        println!("\n  CHECKS");
        for check in &self.checks {
            let mark = if check.passed() { "✓" } else { "✗" };
            println!("    {} {}", mark, check.name);
            if !check.passed() {
                let total = check.passes + check.fails;
                println!(
                    "      ↳ {:.0}% ✓ {} / ✗ {}",
                    check.passes as f64 * 100.0 / total.max(1) as f64,
                    check.passes,
                    check.fails
                );
            }
        }

        println!("\n  THRESHOLDS");
        for result in &self.thresholds.results {
            let mark = if result.passed { "✓" } else { "✗" };
            println!("    {} {} (actual: {})", mark, result.description, ms(result.actual));
        }

        println!("\n═══════════════════════════════════════════════════════════════");
        if self.all_passed {
            println!("  OVERALL: ✓ ALL THRESHOLDS PASS");
        } else {
            println!("  OVERALL: ✗ SOME THRESHOLDS FAILED");
        }
        println!("═══════════════════════════════════════════════════════════════\n");
    }
}

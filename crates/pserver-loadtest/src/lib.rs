//! # Pserver API Load Testing
//!
//! Concurrent synthetic load against the inventory `cloud-infrastructure/pservers`
//! REST API, with per-response checks and run-wide latency and error thresholds.
//!
//! ## Features
//!
//! - **Virtual Users**: N concurrent tokio tasks looping a work unit for a fixed duration
//! - **Workloads**: list pservers (`read`) or create generated pservers (`write`)
//! - **Setup Phase**: one-shot warmup writes, excluded from measurement
//! - **Checks**: named per-response assertions that never abort a user
//! - **Thresholds**: `rate`, `avg`, `med`, `min`, `max` and nearest-rank `p(N)` bounds
//! - **Metrics Export**: Prometheus text format
//!
//! ## Usage
//!
//! ```bash
//! # List workload against a local instance
//! cargo run --package pserver-loadtest -- --port 8447 --duration 10
//!
//! # Write workload with 5 virtual users
//! cargo run --package pserver-loadtest -- --vus 5 write --setup-count 100
//! ```

pub mod checks;
pub mod config;
pub mod error;
pub mod executor;
pub mod exporter;
pub mod metrics;
pub mod payload;
pub mod runner;
pub mod scheduler;
pub mod setup;
pub mod thresholds;
pub mod workload;

pub use checks::{CheckResults, CheckSpec};
pub use config::{LoadTestConfig, RunConfig};
pub use error::{LoadTestError, Result};
pub use executor::{HttpExecutor, Method, RequestExecutor, RequestOutcome, TRANSPORT_FAILURE_STATUS};
pub use metrics::{AggregateMetrics, MetricSample, MetricsCollector};
pub use payload::{generate, PServerRecord, RandomSeeds, SeedSource};
pub use runner::{CompletedRun, LoadTestRunner, RunSummary};
pub use scheduler::{UserState, VirtualUserScheduler};
pub use setup::{run_setup, SetupReport};
pub use thresholds::{ThresholdReport, ThresholdSpec};
pub use workload::{CountMode, ReadWorkload, Workload, WorkloadKind, WriteWorkload};

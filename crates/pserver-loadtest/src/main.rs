//! # Pserver Load Test CLI
//!
//! Command-line interface for load testing the inventory pserver API.
//!
//! ## Usage
//!
//! ```bash
//! # List workload, 3 virtual users for 10 seconds
//! pserver-loadtest --host localhost --port 8447
//!
//! # Write workload with a 100 request warmup
//! pserver-loadtest --vus 5 --duration 30 write --setup-count 100
//!
//! # Extra threshold and JSON results
//! pserver-loadtest --threshold 'http_req_duration:p(95)<500' --output results.json read
//! ```
//!
//! Every option can also be set through the environment variable named in `--help`.
//! The process exits with 0 when every threshold passes, 1 when any fails and 2
//! when the configuration is invalid.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pserver_loadtest::*;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pserver-loadtest")]
#[command(version)]
#[command(about = "Load testing tool for the inventory pserver API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Concurrent virtual users
    #[arg(long = "vus", env = "VUS", default_value = "3")]
    virtual_users: usize,

    /// Test duration in seconds
    #[arg(short, long, env = "DURATION_SECONDS", default_value = "10")]
    duration: u64,

    /// Target scheme (http or https)
    #[arg(long, env = "API_SCHEME", default_value = "http")]
    scheme: String,

    /// Target host
    #[arg(long, env = "API_HOST", default_value = "localhost")]
    host: String,

    /// Target port
    #[arg(short, long, env = "API_PORT", default_value = "8447")]
    port: u16,

    /// API version path segment
    #[arg(long, env = "API_VERSION", default_value = "v29")]
    api_version: String,

    /// Basic auth credentials as user:password
    #[arg(long, env = "API_CREDENTIALS", default_value = "AAI:AAI", hide_env_values = true)]
    credentials: String,

    /// X-FromAppId header value
    #[arg(long, env = "FROM_APP_ID", default_value = "k6")]
    from_app_id: String,

    /// X-TransactionId header value
    #[arg(long, env = "TRANSACTION_ID", default_value = "someTransaction")]
    transaction_id: String,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value = "30")]
    request_timeout: u64,

    /// Accept invalid TLS certificates
    #[arg(long, env = "INSECURE_SKIP_TLS_VERIFY")]
    insecure_skip_tls_verify: bool,

    /// Smallest generated record seed
    #[arg(long, env = "SEED_MIN", default_value = "10000")]
    seed_min: u64,

    /// Largest generated record seed
    #[arg(long, env = "SEED_MAX", default_value = "1000000")]
    seed_max: u64,

    /// Additional threshold, e.g. 'http_req_duration:p(95)<500' (repeatable)
    #[arg(long = "threshold", value_name = "METRIC:EXPR")]
    thresholds: Vec<String>,

    /// Evaluate only --threshold values, not the workload defaults
    #[arg(long)]
    only_thresholds: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output results to JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output final metrics in Prometheus text format
    #[arg(long)]
    prometheus_output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List pservers and verify the result count (default)
    Read {
        /// Result count every response must report
        #[arg(long, env = "EXPECTED_COUNT", default_value = "1000")]
        expected_count: u64,

        /// Verify the `count` field, the array `length`, or `both`
        #[arg(long, default_value = "count")]
        count_mode: CountMode,
    },

    /// Create generated pservers after a warmup
    Write {
        /// Warmup writes before measuring
        #[arg(long, env = "SETUP_COUNT", default_value = "100")]
        setup_count: usize,
    },
}

impl Cli {
    fn load_test_config(&self) -> (WorkloadKind, LoadTestConfig) {
        let mut config = LoadTestConfig {
            virtual_users: self.virtual_users,
            duration_secs: self.duration,
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            api_version: self.api_version.clone(),
            credentials: self.credentials.clone(),
            from_app_id: self.from_app_id.clone(),
            transaction_id: self.transaction_id.clone(),
            request_timeout_secs: self.request_timeout,
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
            seed_min: self.seed_min,
            seed_max: self.seed_max,
            thresholds: self.thresholds.clone(),
            replace_default_thresholds: self.only_thresholds,
            ..Default::default()
        };

        let kind = match &self.command {
            None => WorkloadKind::Read,
            Some(Commands::Read {
                expected_count,
                count_mode,
            }) => {
                config.expected_count = *expected_count;
                config.count_mode = *count_mode;
                WorkloadKind::Read
            }
            Some(Commands::Write { setup_count }) => {
                config.setup_count = *setup_count;
                WorkloadKind::Write
            }
        };
        (kind, config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Pserver Load Test Tool v{}", env!("CARGO_PKG_VERSION"));

    match run(&cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    let (kind, config) = cli.load_test_config();
    let workload = config.workload(kind);
    let run_config =
        RunConfig::build(&config, workload.as_ref()).context("invalid run configuration")?;
    let runner =
        LoadTestRunner::new(run_config, workload).context("failed to create HTTP client")?;

    let run = runner.run().await;
    run.summary.print_report();

    // output failures are reported but never change the verdict
    if let Some(path) = &cli.output {
        match run.summary.write_json(path) {
            Ok(()) => info!("Results saved to {}", path.display()),
            Err(e) => error!("Failed to write results to {}: {}", path.display(), e),
        }
    }
    if let Some(path) = &cli.prometheus_output {
        match exporter::write(&run.aggregate, &run.summary.workload, path) {
            Ok(()) => info!("Metrics saved to {}", path.display()),
            Err(e) => error!("Failed to write metrics to {}: {}", path.display(), e),
        }
    }

    Ok(run.summary.exit_code())
}

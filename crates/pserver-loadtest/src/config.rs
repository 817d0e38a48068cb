//! Run configuration
//!
//! [`LoadTestConfig`] holds the raw settings (CLI flags and environment
//! variables, each with a default). [`RunConfig`] is the validated, immutable
//! value a run is executed with.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checks::CheckSpec;
use crate::error::{LoadTestError, Result};
use crate::executor::{ExecutorSettings, RequestHeaders};
use crate::thresholds::ThresholdSpec;
use crate::workload::{CountMode, ReadWorkload, Workload, WorkloadKind, WriteWorkload};

/// Load test settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    /// Concurrent virtual users
    pub virtual_users: usize,

    /// Measurement window in seconds
    pub duration_secs: u64,

    /// `http` or `https`
    pub scheme: String,

    pub host: String,

    pub port: u16,

    /// API version path segment, e.g. `v29`
    pub api_version: String,

    /// Basic auth `user:password`, sent base64 encoded
    pub credentials: String,

    /// `X-FromAppId` header
    pub from_app_id: String,

    /// `X-TransactionId` header
    pub transaction_id: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Accept invalid TLS certificates
    pub insecure_skip_tls_verify: bool,

    /// Result count the read workload expects
    pub expected_count: u64,

    /// How the read workload verifies the result count
    pub count_mode: CountMode,

    /// Records written by the write workload before measuring
    pub setup_count: usize,

    /// Smallest generated record seed
    pub seed_min: u64,

    /// Largest generated record seed
    pub seed_max: u64,

    /// Extra `metric:expression` thresholds
    pub thresholds: Vec<String>,

    /// Use only `thresholds`, not the workload defaults
    pub replace_default_thresholds: bool,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            virtual_users: 3,
            duration_secs: 10,
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 8447,
            api_version: "v29".to_string(),
            credentials: "AAI:AAI".to_string(),
            from_app_id: "k6".to_string(),
            transaction_id: "someTransaction".to_string(),
            request_timeout_secs: 30,
            insecure_skip_tls_verify: false,
            expected_count: 1000,
            count_mode: CountMode::Count,
            setup_count: 100,
            seed_min: 10_000,
            seed_max: 1_000_000,
            thresholds: Vec::new(),
            replace_default_thresholds: false,
        }
    }
}

impl LoadTestConfig {
    /// `{scheme}://{host}:{port}/aai/{version}`
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}/aai/{}",
            self.scheme, self.host, self.port, self.api_version
        )
    }

    pub fn seed_range(&self) -> RangeInclusive<u64> {
        self.seed_min..=self.seed_max
    }

    /// Reject settings a run cannot start with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(LoadTestError::Config(msg.to_string()));

        if self.virtual_users == 0 {
            return fail("virtual users must be at least 1");
        }
        if self.duration_secs == 0 {
            return fail("duration must be a positive number of seconds");
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return fail("scheme must be http or https");
        }
        if self.host.trim().is_empty() {
            return fail("target host must not be empty");
        }
        if self.port == 0 {
            return fail("target port must not be 0");
        }
        if self.api_version.trim().is_empty() {
            return fail("API version must not be empty");
        }
        if self.credentials.is_empty() {
            return fail("credentials must not be empty");
        }
        if self.request_timeout_secs == 0 {
            return fail("request timeout must be positive");
        }
        if self.seed_min == 0 || self.seed_min > self.seed_max {
            return fail("seed range must be positive with min <= max");
        }
        if self.replace_default_thresholds && self.thresholds.is_empty() {
            return fail("replacing the default thresholds requires at least one threshold");
        }
        Ok(())
    }

    /// Workload selected by `kind`
    pub fn workload(&self, kind: WorkloadKind) -> Arc<dyn Workload> {
        match kind {
            WorkloadKind::Read => Arc::new(ReadWorkload::new(
                &self.base_url(),
                self.expected_count,
                self.count_mode,
            )),
            WorkloadKind::Write => Arc::new(WriteWorkload::new(
                &self.base_url(),
                self.setup_count,
                self.seed_range(),
            )),
        }
    }
}

/// Validated configuration of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Name of the workload the checks and thresholds were resolved for
    pub workload: String,
    pub virtual_users: usize,
    pub duration: Duration,
    pub target_base_url: String,
    pub headers: RequestHeaders,
    pub request_timeout: Duration,
    pub insecure_skip_tls_verify: bool,
    pub thresholds: Vec<ThresholdSpec>,
    pub checks: Vec<CheckSpec>,
}

impl RunConfig {
    /// Validate `config` and resolve thresholds and checks for `workload`
    pub fn build(config: &LoadTestConfig, workload: &dyn Workload) -> Result<Self> {
        config.validate()?;

        let mut thresholds = if config.replace_default_thresholds {
            Vec::new()
        } else {
            workload.default_thresholds()
        };
        for expression in &config.thresholds {
            thresholds.push(ThresholdSpec::parse_qualified(expression)?);
        }

        let checks = workload.checks();
        for (i, check) in checks.iter().enumerate() {
            if checks[..i].iter().any(|earlier| earlier.name == check.name) {
                return Err(LoadTestError::Config(format!(
                    "duplicate check name '{}' in workload {}",
                    check.name,
                    workload.name()
                )));
            }
        }

        Ok(Self {
            workload: workload.name().to_string(),
            virtual_users: config.virtual_users,
            duration: Duration::from_secs(config.duration_secs),
            target_base_url: config.base_url(),
            headers: RequestHeaders::new(
                &config.credentials,
                &config.from_app_id,
                &config.transaction_id,
            ),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            insecure_skip_tls_verify: config.insecure_skip_tls_verify,
            thresholds,
            checks,
        })
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            headers: self.headers.clone(),
            timeout: self.request_timeout,
            max_idle_per_host: self.virtual_users,
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        }
    }
}

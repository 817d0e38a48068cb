//! Default work units driven by the virtual users

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checks::CheckSpec;
use crate::executor::{Method, RequestExecutor, RequestOutcome};
use crate::payload::{generate, SeedSource};
use crate::setup::{run_setup, SetupReport};
use crate::thresholds::{read_defaults, write_defaults, ThresholdSpec};

/// Collection path below the versioned base URL
pub const PSERVERS_PATH: &str = "/cloud-infrastructure/pservers";

/// Work unit repeated by every virtual user
#[async_trait]
pub trait Workload: Send + Sync {
    /// Workload name
    fn name(&self) -> &str;

    /// Statuses that count as a successful request
    fn expected_statuses(&self) -> &[u16];

    /// Per-response checks
    fn checks(&self) -> Vec<CheckSpec>;

    /// Thresholds applied when none are configured explicitly
    fn default_thresholds(&self) -> Vec<ThresholdSpec>;

    /// Warmup run once before measurement starts
    async fn setup(
        &self,
        _executor: &dyn RequestExecutor,
        _seeds: &dyn SeedSource,
    ) -> Option<SetupReport> {
        None
    }

    /// Execute one iteration
    async fn iterate(&self, executor: &dyn RequestExecutor, seeds: &dyn SeedSource)
        -> RequestOutcome;
}

/// Built-in workloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// List pservers and verify the result count
    #[default]
    Read,
    /// Create generated pservers
    Write,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// How the list response size is verified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMode {
    /// `pserver.count` field
    #[default]
    Count,
    /// Length of the `pserver` array
    Length,
    Both,
}

impl FromStr for CountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "length" => Ok(Self::Length),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown count mode '{}' (count, length, both)", other)),
        }
    }
}

impl fmt::Display for CountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Length => "length",
            Self::Both => "both",
        })
    }
}

/// `GET /cloud-infrastructure/pservers`
#[derive(Debug, Clone)]
pub struct ReadWorkload {
    url: String,
    expected_count: u64,
    count_mode: CountMode,
}

impl ReadWorkload {
    pub fn new(base_url: &str, expected_count: u64, count_mode: CountMode) -> Self {
        Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), PSERVERS_PATH),
            expected_count,
            count_mode,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Workload for ReadWorkload {
    fn name(&self) -> &str {
        "read"
    }

    fn expected_statuses(&self) -> &[u16] {
        &[200]
    }

    fn checks(&self) -> Vec<CheckSpec> {
        let mut checks = vec![CheckSpec::status_is(200)];
        if matches!(self.count_mode, CountMode::Count | CountMode::Both) {
            checks.push(CheckSpec::count_field_equals(self.expected_count));
        }
        if matches!(self.count_mode, CountMode::Length | CountMode::Both) {
            checks.push(CheckSpec::collection_length_equals(self.expected_count));
        }
        checks
    }

    fn default_thresholds(&self) -> Vec<ThresholdSpec> {
        read_defaults()
    }

    async fn iterate(
        &self,
        executor: &dyn RequestExecutor,
        _seeds: &dyn SeedSource,
    ) -> RequestOutcome {
        executor.execute(Method::Get, &self.url, None).await
    }
}

/// `PUT /cloud-infrastructure/pservers/pserver/{seed}` with a generated record
#[derive(Debug, Clone)]
pub struct WriteWorkload {
    url: String,
    setup_count: usize,
    seed_range: RangeInclusive<u64>,
}

impl WriteWorkload {
    pub fn new(base_url: &str, setup_count: usize, seed_range: RangeInclusive<u64>) -> Self {
        Self {
            url: format!("{}{}/pserver", base_url.trim_end_matches('/'), PSERVERS_PATH),
            setup_count,
            seed_range,
        }
    }

    pub fn record_url(&self, seed: u64) -> String {
        format!("{}/{}", self.url, seed)
    }

    /// PUT the record generated for `seed`
    pub async fn put_record(&self, executor: &dyn RequestExecutor, seed: u64) -> RequestOutcome {
        match generate(seed).to_json_bytes() {
            Ok(body) => {
                executor
                    .execute(Method::Put, &self.record_url(seed), Some(body))
                    .await
            }
            Err(e) => RequestOutcome::transport_failure(format!("payload encoding: {}", e), 0.0),
        }
    }

    async fn put_random(
        &self,
        executor: &dyn RequestExecutor,
        seeds: &dyn SeedSource,
    ) -> RequestOutcome {
        let seed = seeds.random_int(&self.seed_range);
        self.put_record(executor, seed).await
    }
}

#[async_trait]
impl Workload for WriteWorkload {
    fn name(&self) -> &str {
        "write"
    }

    fn expected_statuses(&self) -> &[u16] {
        &[201]
    }

    fn checks(&self) -> Vec<CheckSpec> {
        vec![CheckSpec::status_is(201)]
    }

    fn default_thresholds(&self) -> Vec<ThresholdSpec> {
        write_defaults()
    }

    async fn setup(
        &self,
        executor: &dyn RequestExecutor,
        seeds: &dyn SeedSource,
    ) -> Option<SetupReport> {
        if self.setup_count == 0 {
            return None;
        }
        Some(run_setup(self.setup_count, move |_| self.put_random(executor, seeds)).await)
    }

    async fn iterate(
        &self,
        executor: &dyn RequestExecutor,
        seeds: &dyn SeedSource,
    ) -> RequestOutcome {
        self.put_random(executor, seeds).await
    }
}

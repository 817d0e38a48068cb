//! Pass/fail thresholds over the aggregate of a whole run
//!
//! Expressions follow the familiar `stat op bound` form, for example
//! `p(99)<3000`, `avg<70` or `rate<0.01`. Percentiles use the nearest-rank
//! method (see [`crate::metrics::nearest_rank`]). A statistic that cannot be
//! computed, such as a percentile over zero samples, fails its threshold.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};
use crate::metrics::{AggregateMetrics, CHECKS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS};

/// Statistic a threshold reads from the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Rate,
    Count,
    Min,
    Max,
    Avg,
    Med,
    Percentile(f64),
}

impl Statistic {
    fn parse(input: &str) -> std::result::Result<Self, String> {
        match input {
            "rate" => Ok(Self::Rate),
            "count" => Ok(Self::Count),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "med" => Ok(Self::Med),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown statistic '{}'", other))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("percentile '{}' is not a number", inner))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(format!("percentile {} outside (0, 100]", p));
                }
                Ok(Self::Percentile(p))
            }
        }
    }

    fn supported_by(&self, metric: &str) -> bool {
        match metric {
            HTTP_REQ_DURATION => !matches!(self, Self::Rate),
            HTTP_REQ_FAILED | CHECKS => matches!(self, Self::Rate | Self::Count),
            ITERATIONS => matches!(self, Self::Count),
            _ => false,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => f.write_str("rate"),
            Self::Count => f.write_str("count"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Avg => f.write_str("avg"),
            Self::Med => f.write_str("med"),
            Self::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

/// Comparison against the bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    pub fn apply(&self, actual: f64, bound: f64) -> bool {
        match self {
            Self::Lt => actual < bound,
            Self::Le => actual <= bound,
            Self::Gt => actual > bound,
            Self::Ge => actual >= bound,
            Self::Eq => actual == bound,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
        }
    }
}

/// Threshold on one metric of the aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub metric: String,
    pub statistic: Statistic,
    pub comparison: Comparison,
    pub bound: f64,
    pub description: String,
}

impl ThresholdSpec {
    pub fn new(metric: &str, statistic: Statistic, comparison: Comparison, bound: f64) -> Self {
        Self {
            metric: metric.to_string(),
            statistic,
            comparison,
            bound,
            description: format!("{}: {}{}{}", metric, statistic, comparison.symbol(), bound),
        }
    }

    /// Parse `expression` (e.g. `p(90)<2000`) for `metric`
    pub fn parse(metric: &str, expression: &str) -> Result<Self> {
        let invalid = |reason: String| LoadTestError::Threshold {
            expression: format!("{}:{}", metric, expression),
            reason,
        };

        let op_at = expression
            .find(['<', '>', '='])
            .ok_or_else(|| invalid("missing comparison operator".to_string()))?;
        let (lhs, rest) = expression.split_at(op_at);
        let (comparison, rhs) = if let Some(rhs) = rest.strip_prefix("<=") {
            (Comparison::Le, rhs)
        } else if let Some(rhs) = rest.strip_prefix(">=") {
            (Comparison::Ge, rhs)
        } else if let Some(rhs) = rest.strip_prefix("==") {
            (Comparison::Eq, rhs)
        } else if let Some(rhs) = rest.strip_prefix('<') {
            (Comparison::Lt, rhs)
        } else if let Some(rhs) = rest.strip_prefix('>') {
            (Comparison::Gt, rhs)
        } else {
            return Err(invalid("use one of <, <=, >, >=, ==".to_string()));
        };

        let statistic = Statistic::parse(lhs.trim()).map_err(invalid)?;
        if !statistic.supported_by(metric) {
            return Err(invalid(format!(
                "statistic '{}' is not available for metric '{}'",
                statistic, metric
            )));
        }
        let bound: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| invalid(format!("bound '{}' is not a number", rhs.trim())))?;

        Ok(Self {
            metric: metric.to_string(),
            statistic,
            comparison,
            bound,
            description: format!("{}: {}", metric, expression.trim()),
        })
    }

    /// Parse `metric:expression`
    pub fn parse_qualified(input: &str) -> Result<Self> {
        let (metric, expression) = input.split_once(':').ok_or_else(|| LoadTestError::Threshold {
            expression: input.to_string(),
            reason: "expected <metric>:<expression>".to_string(),
        })?;
        Self::parse(metric.trim(), expression)
    }

    /// Statistic value read from the aggregate
    pub fn actual(&self, aggregate: &AggregateMetrics) -> Option<f64> {
        match (self.metric.as_str(), self.statistic) {
            (HTTP_REQ_DURATION, Statistic::Count) => Some(aggregate.count() as f64),
            (HTTP_REQ_DURATION, Statistic::Min) => aggregate.min(),
            (HTTP_REQ_DURATION, Statistic::Max) => aggregate.max(),
            (HTTP_REQ_DURATION, Statistic::Avg) => aggregate.avg(),
            (HTTP_REQ_DURATION, Statistic::Med) => aggregate.median(),
            (HTTP_REQ_DURATION, Statistic::Percentile(p)) => aggregate.percentile(p),
            (HTTP_REQ_FAILED, Statistic::Rate) => Some(aggregate.failure_rate()),
            (HTTP_REQ_FAILED, Statistic::Count) => Some(aggregate.failed() as f64),
            (CHECKS, Statistic::Rate) if aggregate.checks_total() > 0 => {
                Some(aggregate.checks_rate())
            }
            (CHECKS, Statistic::Count) => Some(aggregate.checks_total() as f64),
            (ITERATIONS, Statistic::Count) => Some(aggregate.iterations() as f64),
            _ => None,
        }
    }

    pub fn evaluate(&self, aggregate: &AggregateMetrics) -> ThresholdResult {
        let actual = self.actual(aggregate);
        ThresholdResult {
            description: self.description.clone(),
            metric: self.metric.clone(),
            passed: actual.is_some_and(|value| self.comparison.apply(value, self.bound)),
            actual,
        }
    }
}

/// Outcome of one threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub description: String,
    pub metric: String,
    pub passed: bool,
    pub actual: Option<f64>,
}

/// Outcome of every threshold of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub results: Vec<ThresholdResult>,
    pub all_passed: bool,
}

impl ThresholdReport {
    pub fn get(&self, description: &str) -> Option<bool> {
        self.results
            .iter()
            .find(|r| r.description == description)
            .map(|r| r.passed)
    }

    /// Description to pass/fail, in declaration order
    pub fn as_map(&self) -> IndexMap<String, bool> {
        self.results
            .iter()
            .map(|r| (r.description.clone(), r.passed))
            .collect()
    }
}

/// Evaluate every threshold against a settled aggregate
pub fn evaluate(aggregate: &AggregateMetrics, thresholds: &[ThresholdSpec]) -> ThresholdReport {
    let results: Vec<ThresholdResult> = thresholds.iter().map(|t| t.evaluate(aggregate)).collect();
    ThresholdReport {
        all_passed: results.iter().all(|r| r.passed),
        results,
    }
}

fn latency_thresholds(avg_and_med_bound: f64) -> Vec<ThresholdSpec> {
    use Comparison::Lt;
    vec![
        ThresholdSpec::new(HTTP_REQ_FAILED, Statistic::Rate, Lt, 0.01),
        ThresholdSpec::new(HTTP_REQ_DURATION, Statistic::Percentile(99.0), Lt, 3000.0),
        ThresholdSpec::new(HTTP_REQ_DURATION, Statistic::Percentile(90.0), Lt, 2000.0),
        ThresholdSpec::new(HTTP_REQ_DURATION, Statistic::Avg, Lt, avg_and_med_bound),
        ThresholdSpec::new(HTTP_REQ_DURATION, Statistic::Med, Lt, avg_and_med_bound),
        ThresholdSpec::new(HTTP_REQ_DURATION, Statistic::Min, Lt, 1000.0),
    ]
}

/// Default thresholds of the list workload
pub fn read_defaults() -> Vec<ThresholdSpec> {
    latency_thresholds(1000.0)
}

/// Default thresholds of the create workload
pub fn write_defaults() -> Vec<ThresholdSpec> {
    latency_thresholds(70.0)
}

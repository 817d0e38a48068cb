//! Per-response named assertions
//!
//! A check that cannot be evaluated (unparseable body, missing field) counts as
//! failed. Evaluation never aborts the virtual user that produced the outcome.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LoadTestError, Result};
use crate::executor::RequestOutcome;

/// Predicate over a single outcome
pub type CheckPredicate = Arc<dyn Fn(&RequestOutcome) -> Result<bool> + Send + Sync>;

/// Named boolean assertion
#[derive(Clone)]
pub struct CheckSpec {
    pub name: String,
    predicate: CheckPredicate,
}

impl fmt::Debug for CheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckSpec").field("name", &self.name).finish()
    }
}

impl CheckSpec {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&RequestOutcome) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// `status was <code>`
    pub fn status_is(code: u16) -> Self {
        Self::new(format!("status was {}", code), move |outcome| {
            Ok(outcome.status == code)
        })
    }

    /// `returned <n> results`, compares the `pserver.count` field of the body
    pub fn count_field_equals(expected: u64) -> Self {
        Self::new(format!("returned {} results", expected), move |outcome| {
            let body = outcome.json()?;
            let count = body
                .pointer("/pserver/count")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    LoadTestError::MalformedResponse("missing numeric pserver.count".to_string())
                })?;
            Ok(count == expected)
        })
    }

    /// `returned <n> entries`, compares the length of the `pserver` array
    pub fn collection_length_equals(expected: u64) -> Self {
        Self::new(format!("returned {} entries", expected), move |outcome| {
            let body = outcome.json()?;
            let entries = body
                .get("pserver")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    LoadTestError::MalformedResponse("pserver is not an array".to_string())
                })?;
            Ok(entries.len() as u64 == expected)
        })
    }

    /// Evaluate, folding predicate errors and panics into a failed check
    pub fn check(&self, outcome: &RequestOutcome) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(outcome))) {
            Ok(Ok(passed)) => passed,
            Ok(Err(e)) => {
                debug!("Check '{}' could not be evaluated: {}", self.name, e);
                false
            }
            Err(_) => {
                warn!("Check '{}' panicked, counted as failed", self.name);
                false
            }
        }
    }
}

/// Check name to pass/fail for one outcome, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResults(IndexMap<String, bool>);

impl CheckResults {
    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn all_passed(&self) -> bool {
        self.0.values().all(|passed| *passed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, passed)| (name.as_str(), *passed))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Run every check against `outcome`
pub fn evaluate(outcome: &RequestOutcome, checks: &[CheckSpec]) -> CheckResults {
    CheckResults(
        checks
            .iter()
            .map(|spec| (spec.name.clone(), spec.check(outcome)))
            .collect(),
    )
}

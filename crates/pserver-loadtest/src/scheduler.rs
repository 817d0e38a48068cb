//! Virtual user scheduling
//!
//! Each virtual user is a tokio task looping `Idle -> Running -> Stopped`.
//! The run deadline is checked before every iteration, so a request that is
//! already in flight always completes. The scheduler returns only after every
//! task has been joined, which settles the shared collector for evaluation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Barrier;
use tracing::{debug, error, info};

use crate::checks::{self, CheckSpec};
use crate::executor::RequestExecutor;
use crate::metrics::MetricsCollector;
use crate::payload::SeedSource;
use crate::workload::Workload;

/// Lifecycle of one virtual user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Idle,
    Running,
    Stopped,
}

/// Per-user totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReport {
    pub id: usize,
    pub iterations: u64,
    pub failures: u64,
    pub state: UserState,
}

/// Result of one measurement window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerReport {
    pub users: Vec<UserReport>,
    pub elapsed_secs: f64,
    /// Users whose task ended abnormally
    pub aborted: usize,
}

impl SchedulerReport {
    pub fn iterations(&self) -> u64 {
        self.users.iter().map(|u| u.iterations).sum()
    }

    pub fn all_stopped(&self) -> bool {
        self.users.iter().all(|u| u.state == UserState::Stopped)
    }
}

/// Everything a virtual user needs, shared across users
#[derive(Clone)]
pub struct UserContext {
    pub workload: Arc<dyn Workload>,
    pub executor: Arc<dyn RequestExecutor>,
    pub seeds: Arc<dyn SeedSource>,
    pub checks: Arc<[CheckSpec]>,
    pub collector: Arc<MetricsCollector>,
}

/// Runs `virtual_users` concurrent loops for a fixed duration
#[derive(Debug, Clone)]
pub struct VirtualUserScheduler {
    virtual_users: usize,
    duration: Duration,
}

impl VirtualUserScheduler {
    pub fn new(virtual_users: usize, duration: Duration) -> Self {
        Self {
            virtual_users,
            duration,
        }
    }

    pub async fn run(&self, context: UserContext) -> SchedulerReport {
        info!(
            "Starting {} virtual users for {}s ({})",
            self.virtual_users,
            self.duration.as_secs_f64(),
            context.workload.name()
        );

        let barrier = Arc::new(Barrier::new(self.virtual_users.max(1)));
        let start = Instant::now();
        let deadline = start + self.duration;

        let handles: Vec<_> = (0..self.virtual_users)
            .map(|id| tokio::spawn(run_user(id, context.clone(), barrier.clone(), deadline)))
            .collect();

        let mut users = Vec::with_capacity(self.virtual_users);
        let mut aborted = 0;
        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(report) => users.push(report),
                Err(e) => {
                    error!("Virtual user {} aborted: {}", id, e);
                    aborted += 1;
                    users.push(UserReport {
                        id,
                        iterations: 0,
                        failures: 0,
                        state: UserState::Stopped,
                    });
                }
            }
        }

        let report = SchedulerReport {
            users,
            elapsed_secs: start.elapsed().as_secs_f64(),
            aborted,
        };
        info!(
            "All virtual users stopped after {:.2}s, {} iterations",
            report.elapsed_secs,
            report.iterations()
        );
        report
    }
}

async fn run_user(
    id: usize,
    context: UserContext,
    barrier: Arc<Barrier>,
    deadline: Instant,
) -> UserReport {
    let mut report = UserReport {
        id,
        iterations: 0,
        failures: 0,
        state: UserState::Idle,
    };

    barrier.wait().await;
    report.state = UserState::Running;
    debug!("Virtual user {} running", id);

    while Instant::now() < deadline {
        let outcome = context
            .workload
            .iterate(context.executor.as_ref(), context.seeds.as_ref())
            .await;

        let failed = match outcome.classify(context.workload.expected_statuses()) {
            Ok(()) => false,
            Err(e) => {
                error!("Virtual user {}: {}", id, e);
                true
            }
        };
        let results = checks::evaluate(&outcome, &context.checks);

        context.collector.record_outcome(&outcome, failed);
        context.collector.record_checks(&results);
        context.collector.record_iteration();

        report.iterations += 1;
        if failed {
            report.failures += 1;
        }

        // executors that answer without awaiting I/O must not starve other users
        tokio::task::yield_now().await;
    }

    report.state = UserState::Stopped;
    debug!("Virtual user {} stopped after {} iterations", id, report.iterations);
    report
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::executor::{Method, RequestOutcome};
    use crate::payload::{FixedSeed, DEFAULT_SEED_RANGE};
    use crate::workload::{CountMode, ReadWorkload, WriteWorkload};

    const BASE: &str = "http://localhost:8447/aai/v29";

    /// Sleeps like a slow server, then answers with the next scripted status
    struct ScriptedExecutor {
        latency: Duration,
        statuses: Vec<u16>,
        body: String,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(latency_ms: u64, statuses: Vec<u16>, body: &str) -> Self {
            Self {
                latency: Duration::from_millis(latency_ms),
                statuses,
                body: body.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RequestExecutor for ScriptedExecutor {
        async fn execute(&self, _method: Method, _url: &str, _body: Option<Vec<u8>>) -> RequestOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let start = Instant::now();
            tokio::time::sleep(self.latency).await;
            let status = self.statuses[n % self.statuses.len()];
            RequestOutcome::response(status, self.body.clone(), start.elapsed().as_secs_f64() * 1000.0)
        }
    }

    fn context(workload: Arc<dyn Workload>, executor: Arc<ScriptedExecutor>) -> UserContext {
        UserContext {
            checks: workload.checks().into(),
            workload,
            executor,
            seeds: Arc::new(FixedSeed(424242)),
            collector: Arc::new(MetricsCollector::new()),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_users_for_one_second() {
        let executor = Arc::new(ScriptedExecutor::new(20, vec![200], r#"{"pserver":{"count":1000}}"#));
        let ctx = context(
            Arc::new(ReadWorkload::new(BASE, 1000, CountMode::Count)),
            executor.clone(),
        );
        let collector = ctx.collector.clone();

        let report = VirtualUserScheduler::new(3, Duration::from_secs(1)).run(ctx).await;

        assert_eq!(report.users.len(), 3);
        assert!(report.all_stopped());
        assert_eq!(report.aborted, 0);
        assert!(report.users.iter().all(|u| u.iterations > 0));
        assert!(report.elapsed_secs >= 1.0 && report.elapsed_secs < 1.5);

        let aggregate = collector.snapshot();
        assert_eq!(aggregate.count(), report.iterations());
        assert_eq!(aggregate.count(), executor.calls.load(Ordering::SeqCst) as u64);
        assert_eq!(aggregate.failed(), 0);
        let tally = aggregate.checks()["returned 1000 results"];
        assert_eq!(tally.fails, 0);
        assert_eq!(tally.passes, report.iterations());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_request_completes_past_deadline() {
        let executor = Arc::new(ScriptedExecutor::new(400, vec![200], "{}"));
        let ctx = context(
            Arc::new(ReadWorkload::new(BASE, 1000, CountMode::Count)),
            executor,
        );
        let collector = ctx.collector.clone();

        let report = VirtualUserScheduler::new(2, Duration::from_millis(1000)).run(ctx).await;

        // three requests per user: started at ~0, ~400 and ~800ms
        assert!(report.elapsed_secs >= 1.2, "elapsed {}", report.elapsed_secs);
        assert!(report.elapsed_secs < 1.8, "elapsed {}", report.elapsed_secs);
        assert!(report.users.iter().all(|u| u.iterations == 3));
        assert_eq!(collector.snapshot().count(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_errors_do_not_stop_users() {
        let executor = Arc::new(ScriptedExecutor::new(5, vec![201, 500], ""));
        let ctx = context(
            Arc::new(WriteWorkload::new(BASE, 0, DEFAULT_SEED_RANGE)),
            executor,
        );
        let collector = ctx.collector.clone();

        let report = VirtualUserScheduler::new(1, Duration::from_millis(300)).run(ctx).await;
        let user = &report.users[0];
        assert!(user.iterations >= 4);
        assert_eq!(user.failures, user.iterations / 2);

        let aggregate = collector.snapshot();
        let tally = aggregate.checks()["status was 201"];
        assert_eq!(tally.passes, user.iterations - user.failures);
        assert_eq!(tally.fails, user.failures);
        assert_eq!(aggregate.failed(), user.failures);
    }

    #[tokio::test]
    async fn test_instant_executor_does_not_starve_other_users() {
        let executor = Arc::new(ScriptedExecutor::new(0, vec![200], "{}"));
        let ctx = context(
            Arc::new(ReadWorkload::new(BASE, 1000, CountMode::Count)),
            executor,
        );

        let report = VirtualUserScheduler::new(3, Duration::from_millis(100)).run(ctx).await;
        assert!(report.users.iter().all(|u| u.iterations > 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_check_keeps_user_running() {
        let executor = Arc::new(ScriptedExecutor::new(5, vec![200], "{}"));
        let ctx = UserContext {
            checks: vec![CheckSpec::new("explodes", |_| panic!("bad predicate"))].into(),
            ..context(
                Arc::new(ReadWorkload::new(BASE, 1000, CountMode::Count)),
                executor,
            )
        };
        let collector = ctx.collector.clone();

        let report = VirtualUserScheduler::new(1, Duration::from_millis(200)).run(ctx).await;
        assert_eq!(report.aborted, 0);
        assert!(report.users[0].iterations > 1);

        let aggregate = collector.snapshot();
        assert_eq!(aggregate.count(), report.iterations());
        assert_eq!(aggregate.checks()["explodes"].fails, report.iterations());
    }
}

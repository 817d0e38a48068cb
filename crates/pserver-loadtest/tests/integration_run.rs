//! Integration tests for full load test runs
//!
//! These tests run the harness end to end against an in-process pserver API
//! served by axum on an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use pserver_loadtest::{
    CountMode, LoadTestConfig, LoadTestRunner, PServerRecord, RunConfig, WorkloadKind,
};

struct MockInventory {
    count: AtomicU64,
    put_status: StatusCode,
    gets: AtomicUsize,
    puts: AtomicUsize,
    rejected: AtomicUsize,
}

impl MockInventory {
    fn new(count: u64, put_status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU64::new(count),
            put_status,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        })
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").map(|v| v.as_bytes()) == Some(b"Basic QUFJOkFBSQ==".as_slice())
        && headers.get("x-fromappid").is_some()
        && headers.get("x-transactionid").is_some()
        && headers.get("accept").map(|v| v.as_bytes()) == Some(b"application/json".as_slice())
}

async fn list_pservers(
    State(state): State<Arc<MockInventory>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        state.rejected.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    state.gets.fetch_add(1, Ordering::SeqCst);
    let count = state.count.load(Ordering::SeqCst);
    (StatusCode::OK, Json(json!({"pserver": {"count": count}})))
}

async fn put_pserver(
    State(state): State<Arc<MockInventory>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    if !authorized(&headers) {
        state.rejected.fetch_add(1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED;
    }
    state.puts.fetch_add(1, Ordering::SeqCst);
    match serde_json::from_str::<PServerRecord>(&body) {
        Ok(record) if record.hostname.to_string() == id => state.put_status,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn spawn_inventory(state: Arc<MockInventory>) -> SocketAddr {
    let app = Router::new()
        .route("/aai/v29/cloud-infrastructure/pservers", get(list_pservers))
        .route(
            "/aai/v29/cloud-infrastructure/pservers/pserver/:id",
            put(put_pserver),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr) -> LoadTestConfig {
    LoadTestConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        duration_secs: 1,
        request_timeout_secs: 5,
        ..Default::default()
    }
}

fn runner(config: &LoadTestConfig, kind: WorkloadKind) -> LoadTestRunner {
    let workload = config.workload(kind);
    let run_config = RunConfig::build(config, workload.as_ref()).unwrap();
    LoadTestRunner::new(run_config, workload).unwrap()
}

mod read_workload_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_read_run_passes_against_healthy_api() {
        let state = MockInventory::new(1000, StatusCode::CREATED);
        let addr = spawn_inventory(state.clone()).await;

        let run = runner(&config_for(addr), WorkloadKind::Read).run().await;
        let summary = &run.summary;

        assert!(summary.total_requests > 0);
        assert_eq!(summary.total_requests, state.gets.load(Ordering::SeqCst) as u64);
        assert_eq!(summary.failed_requests, 0);
        assert_eq!(state.rejected.load(Ordering::SeqCst), 0);
        assert!(summary.duration_secs >= 1.0 && summary.duration_secs < 2.0);
        assert!(summary.checks.iter().all(|c| c.passed()));
        assert!(summary.all_passed, "{:?}", summary.thresholds);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wrong_count_fails_check_but_not_run() {
        let state = MockInventory::new(999, StatusCode::CREATED);
        let addr = spawn_inventory(state).await;

        let run = runner(&config_for(addr), WorkloadKind::Read).run().await;
        let summary = &run.summary;

        let count_check = summary
            .checks
            .iter()
            .find(|c| c.name == "returned 1000 results")
            .unwrap();
        assert_eq!(count_check.passes, 0);
        assert_eq!(count_check.fails, summary.iterations);
        // checks are reported, thresholds decide the verdict
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_length_mode_fails_on_count_shaped_body() {
        let state = MockInventory::new(1000, StatusCode::CREATED);
        let addr = spawn_inventory(state).await;
        let config = LoadTestConfig {
            count_mode: CountMode::Length,
            ..config_for(addr)
        };

        let run = runner(&config, WorkloadKind::Read).run().await;
        let entries = run
            .summary
            .checks
            .iter()
            .find(|c| c.name == "returned 1000 entries")
            .unwrap();
        assert_eq!(entries.passes, 0);
        assert!(entries.fails > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bad_credentials_fail_thresholds() {
        let state = MockInventory::new(1000, StatusCode::CREATED);
        let addr = spawn_inventory(state.clone()).await;
        let config = LoadTestConfig {
            credentials: "nobody:wrong".to_string(),
            ..config_for(addr)
        };

        let run = runner(&config, WorkloadKind::Read).run().await;
        assert_eq!(run.summary.failure_rate, 1.0);
        assert!(state.rejected.load(Ordering::SeqCst) > 0);
        assert_eq!(run.summary.exit_code(), 1);
    }
}

mod write_workload_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_run_with_setup() {
        let state = MockInventory::new(0, StatusCode::CREATED);
        let addr = spawn_inventory(state.clone()).await;

        let run = runner(&config_for(addr), WorkloadKind::Write).run().await;
        let summary = &run.summary;

        let setup = summary.setup.as_ref().unwrap();
        assert_eq!(setup.attempted, 100);
        assert_eq!(setup.succeeded, 100);
        assert_eq!(
            state.puts.load(Ordering::SeqCst) as u64,
            100 + summary.total_requests
        );
        assert_eq!(summary.failed_requests, 0);
        assert_eq!(summary.checks[0].name, "status was 201");
        assert!(summary.checks[0].passed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_server_errors_are_recorded_not_fatal() {
        let state = MockInventory::new(0, StatusCode::INTERNAL_SERVER_ERROR);
        let addr = spawn_inventory(state.clone()).await;

        let run = runner(&config_for(addr), WorkloadKind::Write).run().await;
        let summary = &run.summary;

        assert_eq!(summary.setup.as_ref().unwrap().failed, 100);
        assert!(summary.iterations > 3);
        assert_eq!(summary.failure_rate, 1.0);
        assert_eq!(summary.checks[0].fails, summary.iterations);
        assert_eq!(summary.thresholds.get("http_req_failed: rate<0.01"), Some(false));
        assert_eq!(summary.exit_code(), 1);
    }
}

mod transport_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unreachable_target_completes_with_failures() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = LoadTestConfig {
            host: "127.0.0.1".to_string(),
            port,
            duration_secs: 1,
            virtual_users: 2,
            ..Default::default()
        };

        let run = runner(&config, WorkloadKind::Read).run().await;
        assert!(run.summary.total_requests > 0);
        assert_eq!(run.summary.failure_rate, 1.0);
        assert!(run.summary.checks.iter().all(|c| !c.passed()));
        assert!(!run.summary.all_passed);
    }
}

//! Single HTTP request execution
//!
//! An executor issues exactly one request per call and never retries. Transport
//! failures come back as an outcome carrying [`TRANSPORT_FAILURE_STATUS`], so the
//! caller can fold them into the failure rate like any other bad response.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LoadTestError, Result};

/// Status recorded when no HTTP response was received
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// Characters of a response body kept in error logs
pub const BODY_SAMPLE_CHARS: usize = 256;

/// HTTP methods used by the workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

/// Result of one HTTP call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// HTTP status, or [`TRANSPORT_FAILURE_STATUS`]
    pub status: u16,
    pub body: String,
    /// Dispatch to full body receipt, monotonic clock
    pub elapsed_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Transport error text when no response arrived
    pub error: Option<String>,
}

impl RequestOutcome {
    /// Outcome for a received response
    pub fn response(status: u16, body: impl Into<String>, elapsed_ms: f64) -> Self {
        let body = body.into();
        Self {
            status,
            bytes_received: body.len() as u64,
            body,
            elapsed_ms: elapsed_ms.max(0.0),
            timestamp: Utc::now(),
            bytes_sent: 0,
            error: None,
        }
    }

    /// Outcome for a raw response body, counting the bytes as they arrived
    pub fn from_body_bytes(status: u16, bytes: &[u8], elapsed_ms: f64) -> Self {
        Self {
            bytes_received: bytes.len() as u64,
            ..Self::response(status, String::from_utf8_lossy(bytes), elapsed_ms)
        }
    }

    /// Outcome for a request that never produced a response
    pub fn transport_failure(error: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            status: TRANSPORT_FAILURE_STATUS,
            body: String::new(),
            elapsed_ms: elapsed_ms.max(0.0),
            timestamp: Utc::now(),
            bytes_sent: 0,
            bytes_received: 0,
            error: Some(error.into()),
        }
    }

    pub fn with_bytes_sent(mut self, bytes_sent: u64) -> Self {
        self.bytes_sent = bytes_sent;
        self
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == TRANSPORT_FAILURE_STATUS
    }

    pub fn is_success_status(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Leading part of the body, for log lines
    pub fn body_sample(&self) -> String {
        match &self.error {
            Some(error) => error.clone(),
            None => self.body.chars().take(BODY_SAMPLE_CHARS).collect(),
        }
    }

    /// Parse the body as JSON
    pub fn json(&self) -> Result<serde_json::Value> {
        if self.is_transport_failure() {
            return Err(LoadTestError::MalformedResponse(
                "no response body (transport failure)".to_string(),
            ));
        }
        serde_json::from_str(&self.body)
            .map_err(|e| LoadTestError::MalformedResponse(e.to_string()))
    }

    /// Classify this outcome against the statuses the workload expects
    pub fn classify(&self, expected: &[u16]) -> std::result::Result<(), LoadTestError> {
        if self.is_transport_failure() {
            return Err(LoadTestError::Transport(
                self.error.clone().unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        if !expected.contains(&self.status) {
            return Err(LoadTestError::UnexpectedStatus {
                status: self.status,
                body: self.body_sample(),
            });
        }
        Ok(())
    }
}

/// Fixed headers sent on every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeaders {
    /// Base64 encoded `user:password`
    pub encoded_credentials: String,
    pub from_app_id: String,
    pub transaction_id: String,
}

impl RequestHeaders {
    pub fn new(credentials: &str, from_app_id: &str, transaction_id: &str) -> Self {
        Self {
            encoded_credentials: BASE64.encode(credentials),
            from_app_id: from_app_id.to_string(),
            transaction_id: transaction_id.to_string(),
        }
    }

    pub fn authorization(&self) -> String {
        format!("Basic {}", self.encoded_credentials)
    }

    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| LoadTestError::Config(format!("invalid header value {:?}: {}", v, e)))
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, value(&self.authorization())?);
        headers.insert(HeaderName::from_static("x-fromappid"), value(&self.from_app_id)?);
        headers.insert(
            HeaderName::from_static("x-transactionid"),
            value(&self.transaction_id)?,
        );
        Ok(headers)
    }
}

/// Issues one HTTP call and reports what happened
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> RequestOutcome;
}

/// Client settings for [`HttpExecutor`]
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub headers: RequestHeaders,
    pub timeout: Duration,
    pub max_idle_per_host: usize,
    pub insecure_skip_tls_verify: bool,
}

/// reqwest backed executor
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(settings: &ExecutorSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(settings.headers.to_header_map()?)
            .timeout(settings.timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .danger_accept_invalid_certs(settings.insecure_skip_tls_verify)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> RequestOutcome {
        let bytes_sent = body.as_ref().map_or(0, |b| b.len() as u64);
        let mut request = self.client.request(method.into(), url);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let start = Instant::now();
        let result = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        }
        .await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let outcome = match result {
            Ok((status, bytes)) => RequestOutcome::from_body_bytes(status, &bytes, elapsed_ms),
            Err(e) => RequestOutcome::transport_failure(e.to_string(), elapsed_ms),
        };
        debug!("{} {} -> {} in {:.2}ms", method, url, outcome.status, outcome.elapsed_ms);
        outcome.with_bytes_sent(bytes_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_received_counts_raw_body() {
        let outcome = RequestOutcome::from_body_bytes(200, &[0xff, 0xfe, b'{', b'}'], 1.0);
        assert_eq!(outcome.bytes_received, 4);
        assert_eq!(outcome.body, "\u{fffd}\u{fffd}{}");
        assert!(outcome.body.len() > 4);

        let outcome = RequestOutcome::from_body_bytes(200, b"{\"pserver\":{}}", 1.0);
        assert_eq!(outcome.bytes_received, 14);
    }

    #[test]
    fn test_default_credentials_encoding() {
        let headers = RequestHeaders::new("AAI:AAI", "k6", "someTransaction");
        assert_eq!(headers.encoded_credentials, "QUFJOkFBSQ==");
        assert_eq!(headers.authorization(), "Basic QUFJOkFBSQ==");
    }

    #[test]
    fn test_header_map_contents() {
        let map = RequestHeaders::new("AAI:AAI", "k6", "someTransaction")
            .to_header_map()
            .unwrap();
        assert_eq!(map[ACCEPT], "application/json");
        assert_eq!(map[AUTHORIZATION], "Basic QUFJOkFBSQ==");
        assert_eq!(map["X-FromAppId"], "k6");
        assert_eq!(map["X-TransactionId"], "someTransaction");
    }

    #[test]
    fn test_invalid_header_value_is_config_error() {
        let err = RequestHeaders::new("AAI:AAI", "bad\nvalue", "tx")
            .to_header_map()
            .unwrap_err();
        assert!(matches!(err, LoadTestError::Config(_)));
    }

    #[test]
    fn test_transport_failure_sentinel() {
        let outcome = RequestOutcome::transport_failure("connection refused", 3.0);
        assert!(outcome.is_transport_failure());
        assert!(!outcome.is_success_status());
        assert_eq!(outcome.body_sample(), "connection refused");
        assert!(matches!(
            outcome.classify(&[200]),
            Err(LoadTestError::Transport(_))
        ));
        assert!(matches!(outcome.json(), Err(LoadTestError::MalformedResponse(_))));
    }

    #[test]
    fn test_classify_statuses() {
        let created = RequestOutcome::response(201, "", 1.0);
        assert!(created.classify(&[201]).is_ok());
        assert!(matches!(
            created.classify(&[200]),
            Err(LoadTestError::UnexpectedStatus { status: 201, .. })
        ));
    }

    #[test]
    fn test_body_sample_truncates() {
        let outcome = RequestOutcome::response(500, "x".repeat(1_000), 1.0);
        assert_eq!(outcome.body_sample().len(), BODY_SAMPLE_CHARS);
        assert_eq!(outcome.bytes_received, 1_000);
    }

    #[test]
    fn test_negative_elapsed_is_clamped() {
        assert_eq!(RequestOutcome::response(200, "", -1.0).elapsed_ms, 0.0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let executor = HttpExecutor::new(&ExecutorSettings {
            headers: RequestHeaders::new("AAI:AAI", "k6", "someTransaction"),
            timeout: Duration::from_secs(2),
            max_idle_per_host: 1,
            insecure_skip_tls_verify: false,
        })
        .unwrap();

        let outcome = executor
            .execute(Method::Get, &format!("http://127.0.0.1:{}/", port), None)
            .await;
        assert!(outcome.is_transport_failure());
        assert!(outcome.elapsed_ms >= 0.0);
    }
}

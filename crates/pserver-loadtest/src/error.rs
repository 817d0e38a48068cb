//! Error types for the load test harness

use thiserror::Error;

/// Load test errors
///
/// Transport, status and body errors stay local to a single iteration and are
/// folded into metrics and check results. Only configuration errors abort a run.
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid threshold `{expression}`: {reason}")]
    Threshold { expression: String, reason: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics export error: {0}")]
    Export(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoadTestError>;

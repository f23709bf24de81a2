//! Error types for the failover tester.
//!
//! This module provides a unified error type [`FailoverError`] for every
//! component of a test run, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Configuration**: malformed global config or scenario, rejected before any phase runs
//! - **Remote calls**: control-plane, data-exchange and SSH failures
//! - **Fault injection**: one or more mechanism-level failures, partial success preserved
//! - **Reconciliation**: data validation could not be computed
//! - **Metrics validation**: an expected metric is missing or out of bounds
//!
//! # Example
//!
//! ```rust
//! use failover_tester::error::{FailoverError, Result};
//!
//! fn require_host(host: Option<&str>) -> Result<&str> {
//!     host.ok_or_else(|| FailoverError::Scenario("host must be specified".into()))
//! }
//!
//! fn handle_error(err: &FailoverError) {
//!     if err.is_retryable() {
//!         println!("Retrying operation...");
//!     } else {
//!         println!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for failover test operations.
#[derive(Error, Debug)]
pub enum FailoverError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Invalid scenario: {0}")]
    Scenario(String),

    // Remote call errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("{0}")]
    NotFound(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Remote command failed on {host}: {message}")]
    RemoteCommand { host: String, message: String },

    // Component errors
    #[error("{0}")]
    FaultInjection(String),

    #[error("Data generation failed: {0}")]
    DataGeneration(String),

    #[error("Data exchange failed: {0}")]
    DataExchange(String),

    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("Metrics validation failed: {0}")]
    MetricsValidation(String),

    #[error("Report generation failed: {0}")]
    Report(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FailoverError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailoverError::Network(_) | FailoverError::Timeout(_) => true,
            FailoverError::Api { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Check if this error means the remote resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FailoverError::NotFound(_))
    }

    /// Check if this error was raised by a remote collaborator rather than locally.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            FailoverError::Authentication(_)
                | FailoverError::NotFound(_)
                | FailoverError::Api { .. }
                | FailoverError::Network(_)
                | FailoverError::Timeout(_)
                | FailoverError::RemoteCommand { .. }
        )
    }
}

/// Result type alias for failover test operations.
pub type Result<T> = std::result::Result<T, FailoverError>;

impl From<serde_json::Error> for FailoverError {
    fn from(err: serde_json::Error) -> Self {
        FailoverError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for FailoverError {
    fn from(err: serde_yaml::Error) -> Self {
        FailoverError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for FailoverError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FailoverError::Network(format!("request timed out: {}", err))
        } else {
            FailoverError::Network(err.to_string())
        }
    }
}

//! Gateway error types.

use mkr_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Snapshot could not be fetched.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Snapshot was fetched but is unusable (one-sided, crossed).
    #[error(transparent)]
    IncompleteBook(#[from] CoreError),

    /// Place or cancel did not reach the exchange or failed in transit.
    #[error("Submit failed: {0}")]
    Submit(String),

    /// Exchange refused the request.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::IncompleteBook(_) => "incomplete_book",
            Self::Submit(_) => "submit",
            Self::Rejected(_) => "rejected",
            Self::Timeout { .. } => "timeout",
            Self::Config(_) => "config",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

//! Config store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Store load timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Parse(_) => "parse",
            Self::HttpClient(_) => "http",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Config(_) => "config",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

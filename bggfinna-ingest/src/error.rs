//! Error types for bggfinna-ingest
//!
//! Client errors are classified so the matcher and the enrichment fetcher can
//! decide between retrying, degrading a single record, or aborting the stage.

use std::time::Duration;
use thiserror::Error;

/// Ingest error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Transport failure (connect, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be parsed
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// HTTP 429/503 from the remote service
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided Retry-After, if any
        retry_after: Option<Duration>,
    },

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Retries exhausted without a usable response
    #[error("Retry budget exceeded: {0}")]
    RetryBudgetExceeded(String),

    /// Unexpected HTTP status
    #[error("API returned status {0}: {1}")]
    Api(u16, String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// bggfinna-common error
    #[error("Common error: {0}")]
    Common(#[from] bggfinna_common::Error),
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IngestError::MalformedResponse(err.to_string())
        } else {
            IngestError::Network(err.to_string())
        }
    }
}

/// Result type for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;

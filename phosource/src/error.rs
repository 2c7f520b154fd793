//! Error types for remote album sources

use std::time::Duration;

/// Result type alias for source operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors raised while listing or downloading remote media
///
/// None of these are swallowed by the source itself: the sync job decides
/// whether and when to retry, using [`FetchError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure (DNS, connection refused, TLS, ...)
    #[error("Remote source unreachable: {0}")]
    Unreachable(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status that may recover later (5xx, 429)
    #[error("Remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Access refused with the current credentials
    #[error("Access unauthorized by status: {0}")]
    Unauthorized(u16),

    /// The remote answered but the payload is unusable
    #[error("Invalid data from remote source: {0}")]
    InvalidData(String),

    /// The fetch did not complete within the allowed time
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The item is not part of the source anymore
    #[error("Item not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether retrying the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::Unauthorized(_) | FetchError::InvalidData(_) | FetchError::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::InvalidData(e.to_string())
    }
}

impl From<url::ParseError> for FetchError {
    fn from(e: url::ParseError) -> Self {
        FetchError::InvalidData(format!("invalid URL: {}", e))
    }
}

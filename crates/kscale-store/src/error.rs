//! Error types for the remote scale store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("expected the API to return 2xx, got {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

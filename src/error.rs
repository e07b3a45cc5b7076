//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror. Each concern has its own
//! enum so callers can tell a cache miss, a storage failure, a transport
//! failure and a rate-limit veto apart.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Storage Error ==
/// Failure reported by a persistent tier (KV store or partition store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store refused the write because it is full
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The backing medium failed
    #[error("Storage I/O failure: {0}")]
    Io(String),

    /// A value could not be encoded or decoded
    #[error("Storage serialization failure: {0}")]
    Serialization(String),
}

impl StorageError {
    /// True when the failure is a quota/size rejection.
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// == Fetch Error ==
/// Transport-level failure at the fetch boundary (unreachable, DNS, timeout).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The origin could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// The request could not be built (bad URL, unsupported scheme)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The interception worker is no longer running
    #[error("Worker unavailable: {0}")]
    Unavailable(String),
}

// == Prefetch Error ==
/// Failure of a prefetch call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefetchError {
    /// The call arrived inside the minimum interval and nothing was cached
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The underlying fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The origin answered with a non-success status
    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    /// The body was not valid JSON
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// The background fetch task died before settling
    #[error("Prefetch aborted: {0}")]
    Aborted(String),
}

impl From<tokio::task::JoinError> for PrefetchError {
    fn from(err: tokio::task::JoinError) -> Self {
        PrefetchError::Aborted(err.to_string())
    }
}

impl PrefetchError {
    /// True for the "skip, not a failure" veto.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PrefetchError::RateLimited(_))
    }
}

// == Cache Error Enum ==
/// Unified error type for the key-value cache and the HTTP surface.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Entry can never fit in the configured budget
    #[error("Entry too large: {0}")]
    TooLarge(String),

    /// Persistent tier failed even after cleanup
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A value producer passed to `get_or_set` failed
    #[error("Fetcher failed: {0}")]
    Fetcher(String),

    /// Prefetch failed
    #[error(transparent)]
    Prefetch(#[from] PrefetchError),

    /// A proxied request could not reach the origin or the worker
    #[error("Upstream unavailable: {0}")]
    Upstream(#[from] FetchError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Storage(StorageError::from(err))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::Storage(StorageError::QuotaExceeded(_)) => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CacheError::Fetcher(_) => StatusCode::BAD_GATEWAY,
            CacheError::Prefetch(PrefetchError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
            CacheError::Prefetch(PrefetchError::Status { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            CacheError::Prefetch(_) => StatusCode::BAD_GATEWAY,
            CacheError::Upstream(FetchError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            CacheError::Upstream(FetchError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Upstream(_) => StatusCode::BAD_GATEWAY,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;

//! Response DTOs for the cache service API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::kv::CacheStats;
use crate::prefetch::PrefetchStats;
use crate::worker::WorkerStats;

/// Response body for `GET /kv/:namespace/:key`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub namespace: String,
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }
}

/// Response body for `PUT /kv/:namespace/:key`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
}

impl SetResponse {
    pub fn new(namespace: &str, key: &str) -> Self {
        Self {
            message: format!("Key '{}' set successfully in namespace '{}'", key, namespace),
        }
    }
}

/// Response body for `DELETE /kv/:namespace/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

impl DeleteResponse {
    pub fn new(namespace: &str, key: &str) -> Self {
        Self {
            message: format!("Key '{}' deleted from namespace '{}'", key, namespace),
        }
    }
}

/// Response body for the namespace and global clears
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Number of entries removed
    pub removed: usize,
    pub message: String,
}

impl ClearResponse {
    pub fn new(removed: usize, scope: &str) -> Self {
        Self {
            removed,
            message: format!("Cleared {} entries from {}", removed, scope),
        }
    }
}

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub kv: CacheStats,
    pub prefetch: PrefetchStats,
    /// Absent when the worker has stopped
    pub worker: Option<WorkerStats>,
}

/// Response body for `POST /prefetch/queue`
#[derive(Debug, Clone, Serialize)]
pub struct QueuedResponse {
    pub queued: usize,
}

/// Response body for health check (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (always "healthy" if responding)
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

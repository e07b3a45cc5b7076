//! Request DTOs for the cache service API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

/// Request body for `PUT /kv/:namespace/:key`
///
/// # Fields
/// - `value`: Any JSON value, including `null`
/// - `ttl`: Optional TTL in milliseconds (uses the default if not specified)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The value to store
    pub value: Value,
    /// Optional TTL in milliseconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.ttl == Some(0) {
            return Some("TTL must be greater than zero".to_string());
        }
        None
    }
}

/// Request body for `POST /prefetch/queue`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueRequest {
    /// Product ids to prefetch
    #[serde(default)]
    pub ids: Vec<String>,
    /// Listing parameter sets to prefetch
    #[serde(default)]
    pub lists: Vec<Value>,
}

impl QueueRequest {
    pub fn validate(&self) -> Option<String> {
        if self.ids.is_empty() && self.lists.is_empty() {
            return Some("Nothing to prefetch: provide ids or lists".to_string());
        }
        if self.ids.iter().any(|id| id.is_empty()) {
            return Some("Product ids cannot be empty".to_string());
        }
        None
    }

    pub fn len(&self) -> usize {
        self.ids.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

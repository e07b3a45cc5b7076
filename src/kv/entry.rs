//! Cache Entry Module
//!
//! Defines the persisted shape of key-value entries with TTL support.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A single key-value entry. Serialized as `{value, timestamp, ttl, size}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Time to live in milliseconds
    pub ttl: u64,
    /// Estimated footprint in bytes
    pub size: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry and computes its size estimate.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - TTL in milliseconds
    /// * `now` - Creation time in Unix milliseconds
    pub fn new(value: Value, ttl: u64, now: u64) -> Self {
        let mut entry = Self {
            value,
            timestamp: now,
            ttl,
            size: 0,
        };
        entry.size = entry.estimate_size();
        entry
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is valid while `now - timestamp < ttl`, so
    /// it is expired as soon as the full TTL has elapsed.
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) >= self.ttl
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds (0 once expired).
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.timestamp.saturating_add(self.ttl).saturating_sub(now)
    }

    /// Serialized byte length of the entry as it would be persisted.
    ///
    /// The `size` field itself is counted with its final digit width.
    fn estimate_size(&self) -> usize {
        let draft = Self { size: 0, ..self.clone() };
        // `size` was serialized as the single digit "0"
        let base = match serde_json::to_string(&draft) {
            Ok(raw) => raw.len(),
            Err(_) => return 0,
        };
        let mut size = base;
        loop {
            let candidate = base - 1 + size.to_string().len();
            if candidate == size {
                return size;
            }
            size = candidate;
        }
    }

    /// Encodes the entry for the persistent tier.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes an entry read from the persistent tier.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

//! Key-Value Cache Module
//!
//! Namespaced TTL cache used by application code to memoize JSON values,
//! with an in-memory tier mirrored into a persistent store.

mod entry;
mod manager;
mod stats;
mod storage;


// Re-export public types
pub use entry::CacheEntry;
pub use manager::{CacheManager, KvConfig};
pub use stats::{format_hit_rate, CacheStats, Counters};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

#[cfg(test)]
pub(crate) use storage::test_support;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

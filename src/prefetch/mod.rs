//! Prefetch Coordinator
//!
//! Deduplicated, rate-limited product prefetching with a bounded background
//! queue.

mod coordinator;
mod key;
mod queue;

pub use coordinator::{PrefetchConfig, PrefetchCoordinator, PrefetchEntry, PrefetchStats};
pub use key::{canonical_json, detail_key, list_key, query_string};
pub use queue::PrefetchQueue;

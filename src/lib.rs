//! WaZhop Cache - Offline-resilient caching layer for the storefront
//!
//! Three cooperating caches:
//! - an intercepting HTTP cache with four partitions and per-class strategies
//! - a namespaced key-value cache with TTL, hit/miss stats and a size budget
//! - a prefetch coordinator that coalesces and rate-limits catalogue fetches

pub mod api;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod fetch;
pub mod kv;
pub mod models;
pub mod prefetch;
pub mod tasks;
pub mod worker;

pub use api::AppState;
pub use config::Config;
pub use kv::CacheManager;
pub use prefetch::PrefetchCoordinator;
pub use tasks::Scheduler;
pub use worker::WorkerHandle;

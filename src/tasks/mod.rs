//! Background Tasks Module
//!
//! Periodic sweeps of the three caches and the scheduler that owns them.
//!
//! # Tasks
//! - KV sweep: removes expired key-value entries from both tiers
//! - Worker sweep: drops aged responses from the api, dynamic and images partitions
//! - Prefetch sweep: drops prefetch results past their retention window

mod cleanup;
mod scheduler;

pub use cleanup::{spawn_kv_sweep, spawn_prefetch_sweep, spawn_worker_sweep};
pub use scheduler::Scheduler;

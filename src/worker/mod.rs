//! Network Interception Cache
//!
//! A service-worker style cache sitting between the application and the
//! network: request classification, four retention partitions, a versioned
//! lifecycle and an actor front end.

mod actor;
mod classify;
mod partition;
mod service;

pub use actor::{spawn_worker, WorkerHandle, WorkerMessage};
pub use classify::{classify, ClassifyRules, RequestClass};
pub use partition::{
    cached_at, MemoryPartitionStore, PartitionKind, PartitionNames, PartitionStore, RequestKey,
    CACHED_AT_HEADER,
};
pub use service::{
    CommandReply, InstallReport, PartitionStats, ServiceWorker, WorkerCommand, WorkerConfig,
    WorkerState, WorkerStats,
};

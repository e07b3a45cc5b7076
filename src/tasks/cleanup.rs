//! Periodic Sweeps
//!
//! Background loops that expire entries from the key-value cache, the
//! interception partitions and the prefetch result cache.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::kv::CacheManager;
use crate::prefetch::PrefetchCoordinator;
use crate::worker::WorkerHandle;

/// Spawns a loop running `sweep` every `interval_secs` seconds (at least
/// one). The first run happens one full interval after spawning.
fn spawn_periodic<F, Fut>(name: &'static str, interval_secs: u64, mut sweep: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = usize> + Send,
{
    let period = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!("Starting {} sweep with interval of {} seconds", name, period.as_secs());

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let removed = sweep().await;
            if removed > 0 {
                info!("{} sweep: removed {} entries", name, removed);
            } else {
                debug!("{} sweep: nothing to remove", name);
            }
        }
    })
}

/// Expires key-value entries in both tiers, then evicts oldest-first if
/// the store is still over budget.
pub fn spawn_kv_sweep(cache: CacheManager, interval_secs: u64) -> JoinHandle<()> {
    spawn_periodic("kv", interval_secs, move || {
        let cache = cache.clone();
        async move { cache.cleanup_expired().await + cache.enforce_budget().await }
    })
}

/// Asks the interception worker to expire aged partition entries.
pub fn spawn_worker_sweep(worker: WorkerHandle, interval_secs: u64) -> JoinHandle<()> {
    spawn_periodic("worker", interval_secs, move || {
        let worker = worker.clone();
        async move {
            worker.sweep().await.unwrap_or_else(|e| {
                warn!("Worker sweep skipped: {}", e);
                0
            })
        }
    })
}

/// Drops prefetch results past their retention window.
pub fn spawn_prefetch_sweep(coordinator: PrefetchCoordinator, interval_secs: u64) -> JoinHandle<()> {
    spawn_periodic("prefetch", interval_secs, move || {
        let coordinator = coordinator.clone();
        async move { coordinator.clear_stale().await }
    })
}

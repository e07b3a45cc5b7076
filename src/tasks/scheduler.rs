//! Sweep Scheduler
//!
//! Owns the handles of every periodic sweep so they can be stopped together.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::kv::CacheManager;
use crate::prefetch::PrefetchCoordinator;
use crate::worker::WorkerHandle;

use super::cleanup::{spawn_kv_sweep, spawn_prefetch_sweep, spawn_worker_sweep};

/// Running background sweeps.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    /// Starts the key-value, worker and prefetch sweeps with the configured
    /// intervals.
    pub fn start(
        config: &Config,
        cache: &CacheManager,
        worker: &WorkerHandle,
        prefetch: &PrefetchCoordinator,
    ) -> Self {
        let mut scheduler = Self::default();
        scheduler.register("kv", spawn_kv_sweep(cache.clone(), config.kv_sweep_interval));
        scheduler.register(
            "worker",
            spawn_worker_sweep(worker.clone(), config.worker_sweep_interval),
        );
        scheduler.register(
            "prefetch",
            spawn_prefetch_sweep(prefetch.clone(), config.prefetch_sweep_interval),
        );
        info!("Started {} background sweeps", scheduler.len());
        scheduler
    }

    /// Takes ownership of an already spawned task.
    pub fn register(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Aborts every task and waits for them to wind down.
    ///
    /// Returns how many sweeps had already died (panicked) rather than being
    /// stopped by the abort.
    pub async fn shutdown(self) -> usize {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
        let mut failed = 0;
        for (name, handle) in self.tasks {
            match handle.await {
                Err(e) if !e.is_cancelled() => {
                    warn!("{} sweep ended abnormally: {}", name, e);
                    failed += 1;
                }
                _ => debug!("{} sweep stopped", name),
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::fetch::test_support::ScriptedFetcher;
    use crate::kv::KvConfig;
    use crate::prefetch::PrefetchConfig;
    use crate::worker::{spawn_worker, MemoryPartitionStore, ServiceWorker, WorkerConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let config = Config::default();
        let origin = Url::parse(&config.origin_url).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());

        let cache = CacheManager::in_memory(KvConfig::from(&config));
        let (worker, _task) = spawn_worker(ServiceWorker::new(
            WorkerConfig::new(config.cache_namespace.clone(), origin.clone()),
            Box::new(MemoryPartitionStore::new()),
            fetcher.clone(),
            system_clock(),
        ));
        let prefetch =
            PrefetchCoordinator::new(origin, fetcher, system_clock(), PrefetchConfig::default());

        let mut scheduler = Scheduler::start(&config, &cache, &worker, &prefetch);
        assert_eq!(scheduler.len(), 3);

        // A registered task is dropped once shutdown returns
        let token = Arc::new(());
        let held = token.clone();
        scheduler.register(
            "sleeper",
            tokio::spawn(async move {
                let _held = held;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );
        tokio::task::yield_now().await;
        assert_eq!(Arc::strong_count(&token), 2);

        assert_eq!(scheduler.shutdown().await, 0);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[tokio::test]
    async fn test_shutdown_reports_only_failed_sweeps() {
        let mut scheduler = Scheduler::default();
        scheduler.register(
            "broken",
            tokio::spawn(async {
                panic!("sweep bug");
            }),
        );
        scheduler.register(
            "idle",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );
        // Let the broken sweep die before shutdown aborts it
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(scheduler.shutdown().await, 1);
    }
}

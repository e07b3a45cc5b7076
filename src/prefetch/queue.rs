//! Prefetch Queue
//!
//! Deferred prefetch jobs executed in batches under a concurrency ceiling.
//! Each batch is awaited in full before the next one starts, and failures
//! inside a batch never stop its siblings.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

use crate::error::PrefetchError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value, PrefetchError>> + Send>;

struct QueueInner {
    jobs: Mutex<VecDeque<Job>>,
    draining: AtomicBool,
    concurrency: usize,
}

/// Bounded-concurrency job queue. Clones share the same queue.
#[derive(Clone)]
pub struct PrefetchQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for PrefetchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchQueue")
            .field("queued", &self.len())
            .field("concurrency", &self.inner.concurrency)
            .finish()
    }
}

impl PrefetchQueue {
    /// Creates a queue running at most `concurrency` jobs at once.
    pub fn new(concurrency: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                concurrency: concurrency.max(1),
            }),
        }
    }

    /// Adds a job. Nothing runs until `process` is called.
    pub fn push<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, PrefetchError>> + Send + 'static,
    {
        self.lock().push_back(Box::new(move || job().boxed()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Drains the queue batch by batch and returns the number of jobs run.
    ///
    /// Returns 0 immediately when another call is already draining.
    pub async fn process(&self) -> usize {
        let mut processed = 0;

        loop {
            if self.inner.draining.swap(true, Ordering::SeqCst) {
                return processed;
            }

            loop {
                let batch = self.next_batch();
                if batch.is_empty() {
                    break;
                }
                processed += batch.len();

                let outcomes = join_all(batch.into_iter().map(|job| job())).await;
                for outcome in outcomes {
                    match outcome {
                        Err(e) if e.is_rate_limited() => {}
                        Err(e) => debug!("Queued prefetch failed: {}", e),
                        Ok(_) => {}
                    }
                }
            }

            self.inner.draining.store(false, Ordering::SeqCst);
            // A job pushed after the last empty check would otherwise wait
            // for the next caller.
            if self.is_empty() {
                return processed;
            }
        }
    }

    fn next_batch(&self) -> Vec<Job> {
        let mut jobs = self.lock();
        let take = jobs.len().min(self.inner.concurrency);
        jobs.drain(..take).collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

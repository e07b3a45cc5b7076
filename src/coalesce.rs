//! Request Coalescing
//!
//! Tracks in-flight computations by key so concurrent callers asking for the
//! same thing share a single underlying call.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

/// Cloneable handle to the outcome of an in-flight computation.
pub type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

// == In-Flight Registry ==
/// Registry of pending computations keyed by `K`.
///
/// A computation is spawned onto the runtime when it starts, so it always runs
/// to completion even if every caller stops waiting. Its marker is removed as
/// soon as it settles, whatever the outcome.
pub struct InFlight<K, T, E> {
    pending: Arc<Mutex<HashMap<K, SharedResult<T, E>>>>,
}

impl<K, T, E> Clone for InFlight<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K, T, E> Default for InFlight<K, T, E> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T, E> std::fmt::Debug for InFlight<K, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").finish_non_exhaustive()
    }
}

/// Removes its key from the registry when dropped, so a computation that
/// panics or is cancelled still clears its entry.
struct Marker<K, T, E>
where
    K: Eq + Hash,
{
    registry: Arc<Mutex<HashMap<K, SharedResult<T, E>>>>,
    key: K,
}

impl<K, T, E> Drop for Marker<K, T, E>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.key);
    }
}

impl<K, T, E> InFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    // == Join ==
    /// Returns the pending computation for `key`, if any.
    pub fn join(&self, key: &K) -> Option<SharedResult<T, E>> {
        self.lock().get(key).cloned()
    }

    // == Start ==
    /// Returns the pending computation for `key`, or spawns `work` and
    /// registers it. The boolean is true when `work` was started by this call.
    pub fn start<F>(&self, key: K, work: F) -> (SharedResult<T, E>, bool)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut pending = self.lock();
        if let Some(existing) = pending.get(&key) {
            return (existing.clone(), false);
        }

        let marker = Marker {
            registry: Arc::clone(&self.pending),
            key: key.clone(),
        };
        // The registry lock is held until the marker is inserted below, so
        // the removal at settlement always observes it.
        let handle = tokio::spawn(async move {
            let _marker = marker;
            work.await
        });

        let shared = async move { handle.await.unwrap_or_else(|e| Err(E::from(e))) }
            .boxed()
            .shared();
        pending.insert(key, shared.clone());
        (shared, true)
    }

    /// Number of computations currently in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, SharedResult<T, E>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(String);

    impl From<JoinError> for TestError {
        fn from(err: JoinError) -> Self {
            TestError(err.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_call() {
        let registry: InFlight<String, u32, TestError> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<u32, TestError>(7)
        };

        let (first, started_first) = registry.start("k".to_string(), make(calls.clone()));
        let (second, started_second) = registry.start("k".to_string(), make(calls.clone()));

        assert!(started_first);
        assert!(!started_second);
        assert_eq!(first.await, Ok(7));
        assert_eq!(second.await, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_marker_removed_after_failure() {
        let registry: InFlight<String, u32, TestError> = InFlight::new();

        let (fut, _) = registry.start("k".to_string(), async {
            Err::<u32, TestError>(TestError("boom".to_string()))
        });
        assert_eq!(fut.await, Err(TestError("boom".to_string())));

        // Removal happens inside the spawned task; give it a chance to run.
        tokio::task::yield_now().await;
        assert!(registry.join(&"k".to_string()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_marker_removed_after_panic() {
        let registry: InFlight<String, u32, TestError> = InFlight::new();

        let (fut, _) = registry.start("k".to_string(), async {
            if true {
                panic!("producer bug");
            }
            Ok::<u32, TestError>(0)
        });
        let outcome = fut.await;
        assert!(matches!(outcome, Err(TestError(msg)) if msg.contains("panicked")));
        assert!(registry.is_empty());

        // The next caller runs its own work instead of joining the dead task
        let (fut, started) = registry.start("k".to_string(), async { Ok::<u32, TestError>(5) });
        assert!(started);
        assert_eq!(fut.await, Ok(5));
    }

    #[tokio::test]
    async fn test_work_completes_without_waiters() {
        let registry: InFlight<String, u32, TestError> = InFlight::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();

        let (fut, _) = registry.start("k".to_string(), async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, TestError>(1)
        });
        drop(fut);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }
}

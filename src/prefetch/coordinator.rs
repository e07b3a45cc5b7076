//! Prefetch Coordinator
//!
//! Warms product data ahead of navigation. Each call is answered from a
//! fresh cached result, joined to an identical call already in flight,
//! vetoed by the per-key rate limit, or sent to the origin, in that order.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::clock::SharedClock;
use crate::coalesce::InFlight;
use crate::error::{FetchError, PrefetchError};
use crate::fetch::{Request, SharedFetcher};

use super::key::{detail_key, list_key, query_string};
use super::queue::PrefetchQueue;

// == Prefetch Config ==
/// Time windows of the coordinator, in milliseconds.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Age below which a cached result is served without any network call
    pub fresh_ms: u64,
    /// Minimum gap between two network attempts for the same key
    pub min_interval_ms: u64,
    /// Age after which the sweep drops a cached result
    pub retention_ms: u64,
    /// Queue concurrency ceiling
    pub concurrency: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            fresh_ms: 2 * 60 * 1000,
            min_interval_ms: 3 * 1000,
            retention_ms: 5 * 60 * 1000,
            concurrency: 2,
        }
    }
}

/// A cached prefetch result.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchEntry {
    pub data: Value,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchStats {
    pub cached_entries: usize,
    pub in_flight: usize,
    pub queued: usize,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    cache: HashMap<String, PrefetchEntry>,
    last_attempt: HashMap<String, u64>,
}

struct Inner {
    origin: Url,
    config: PrefetchConfig,
    fetcher: SharedFetcher,
    clock: SharedClock,
    state: RwLock<CoordinatorState>,
    in_flight: InFlight<String, Value, PrefetchError>,
    queue: PrefetchQueue,
}

// == Coordinator ==
/// Shared prefetch coordinator. Clones share all state.
#[derive(Clone)]
pub struct PrefetchCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PrefetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchCoordinator")
            .field("origin", &self.inner.origin.as_str())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl PrefetchCoordinator {
    pub fn new(
        origin: Url,
        fetcher: SharedFetcher,
        clock: SharedClock,
        config: PrefetchConfig,
    ) -> Self {
        let queue = PrefetchQueue::new(config.concurrency);
        Self {
            inner: Arc::new(Inner {
                origin,
                config,
                fetcher,
                clock,
                state: RwLock::new(CoordinatorState::default()),
                in_flight: InFlight::new(),
                queue,
            }),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }

    /// Prefetches a product listing for `params`.
    pub async fn prefetch_list(&self, params: &Value) -> Result<Value, PrefetchError> {
        let mut url = self.endpoint(&["api", "products"])?;
        let query = query_string(params);
        if !query.is_empty() {
            url.set_query(Some(&query));
        }
        self.prefetch(list_key(params), url, false).await
    }

    /// Prefetches one product and warms its primary image.
    pub async fn prefetch_detail(&self, id: &str) -> Result<Value, PrefetchError> {
        if id.is_empty() {
            return Err(FetchError::InvalidRequest("product id cannot be empty".to_string()).into());
        }
        let url = self.endpoint(&["api", "products", id])?;
        self.prefetch(detail_key(id), url, true).await
    }

    async fn prefetch(&self, key: String, url: Url, warm_image: bool) -> Result<Value, PrefetchError> {
        let now = self.inner.clock.now_ms();
        let config = &self.inner.config;

        // Decisions happen under one lock so a same-tick caller joins the
        // pending call instead of tripping the rate limit.
        let pending = {
            let mut state = self.inner.state.write().await;

            if let Some(entry) = state.cache.get(&key) {
                if now.saturating_sub(entry.timestamp) < config.fresh_ms {
                    debug!("Prefetch {} served fresh from cache", key);
                    return Ok(entry.data.clone());
                }
            }

            match self.inner.in_flight.join(&key) {
                Some(pending) => {
                    debug!("Prefetch {} joined in-flight call", key);
                    pending
                }
                None => {
                    if let Some(last) = state.last_attempt.get(&key) {
                        if now.saturating_sub(*last) < config.min_interval_ms {
                            return match state.cache.get(&key) {
                                Some(entry) => {
                                    debug!("Prefetch {} rate limited, serving stale value", key);
                                    Ok(entry.data.clone())
                                }
                                None => Err(PrefetchError::RateLimited(key)),
                            };
                        }
                    }
                    state.last_attempt.insert(key.clone(), now);

                    let this = self.clone();
                    let work_key = key.clone();
                    let (pending, _) = self.inner.in_flight.start(key, async move {
                        this.fetch_and_store(work_key, url, warm_image).await
                    });
                    pending
                }
            }
        };

        pending.await
    }

    async fn fetch_and_store(&self, key: String, url: Url, warm_image: bool) -> Result<Value, PrefetchError> {
        let response = self
            .inner
            .fetcher
            .fetch(Request::new(Method::GET, url.clone()))
            .await?;
        if !response.is_success() {
            return Err(PrefetchError::Status {
                status: response.status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .json_body()
            .map_err(|e| PrefetchError::Decode(format!("{url}: {e}")))?;
        let data = unwrap_envelope(body);

        self.inner.state.write().await.cache.insert(
            key.clone(),
            PrefetchEntry {
                data: data.clone(),
                timestamp: self.inner.clock.now_ms(),
            },
        );
        debug!("Prefetched {}", key);

        if warm_image {
            if let Some(image) = primary_image(&data) {
                self.preload_image(image);
            }
        }
        Ok(data)
    }

    /// Fire-and-forget GET of an image so the interception cache stores it.
    fn preload_image(&self, image: &str) {
        let url = match self.inner.origin.join(image) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping image warm-up for {}: {}", image, e);
                return;
            }
        };
        let fetcher = Arc::clone(&self.inner.fetcher);
        tokio::spawn(async move {
            if let Err(e) = fetcher.fetch(Request::new(Method::GET, url.clone())).await {
                debug!("Image warm-up for {} failed: {}", url, e);
            }
        });
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PrefetchError> {
        let mut url = self.inner.origin.clone();
        url.path_segments_mut()
            .map_err(|_| {
                FetchError::InvalidRequest(format!("origin {} cannot be a base", self.inner.origin))
            })?
            .clear()
            .extend(segments);
        Ok(url)
    }

    // == Cache Access ==
    /// Returns the cached result for `key`, whatever its age.
    pub async fn get_cached(&self, key: &str) -> Option<Value> {
        self.inner
            .state
            .read()
            .await
            .cache
            .get(key)
            .map(|entry| entry.data.clone())
    }

    /// Drops results older than the retention window. Returns how many went.
    pub async fn clear_stale(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let config = &self.inner.config;
        let mut state = self.inner.state.write().await;

        let before = state.cache.len();
        state
            .cache
            .retain(|_, entry| now.saturating_sub(entry.timestamp) <= config.retention_ms);
        state
            .last_attempt
            .retain(|_, at| now.saturating_sub(*at) < config.min_interval_ms);

        let removed = before - state.cache.len();
        if removed > 0 {
            info!("Dropped {} stale prefetch results", removed);
        }
        removed
    }

    // == Queue ==
    /// Queues a listing prefetch and starts draining in the background.
    pub fn queue_list(&self, params: Value) {
        let this = self.clone();
        self.inner
            .queue
            .push(move || async move { this.prefetch_list(&params).await });
        self.spawn_drain();
    }

    /// Queues a detail prefetch and starts draining in the background.
    pub fn queue_detail(&self, id: String) {
        let this = self.clone();
        self.inner
            .queue
            .push(move || async move { this.prefetch_detail(&id).await });
        self.spawn_drain();
    }

    /// Drains the queue on the caller's task. A no-op while already draining.
    pub async fn process_queue(&self) -> usize {
        self.inner.queue.process().await
    }

    fn spawn_drain(&self) {
        let queue = self.inner.queue.clone();
        tokio::spawn(async move {
            queue.process().await;
        });
    }

    pub async fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            cached_entries: self.inner.state.read().await.cache.len(),
            in_flight: self.inner.in_flight.len(),
            queued: self.inner.queue.len(),
        }
    }
}

/// Unwraps a `{"data": ...}` envelope; bare bodies pass through.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("data").is_some_and(|d| !d.is_null()) => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    }
}

/// `image`, else the first of `images`; either a URL string or `{url}`.
fn primary_image(product: &Value) -> Option<&str> {
    let candidate = match product.get("image") {
        Some(image) if !image.is_null() => image,
        _ => product.get("images")?.as_array()?.first()?,
    };
    match candidate {
        Value::String(url) => Some(url),
        Value::Object(obj) => obj.get("url")?.as_str(),
        _ => None,
    }
}

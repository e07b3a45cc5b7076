//! API Handlers
//!
//! HTTP request handlers for the key-value cache, the worker message channel,
//! the prefetch coordinator and the intercepted origin proxy.

use axum::{
    body::to_bytes,
    extract::{Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use url::Url;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fetch::{self, RequestMode, SharedFetcher};
use crate::kv::{CacheManager, KeyValueStore, KvConfig};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, QueueRequest, QueuedResponse,
    SetRequest, SetResponse, StatsResponse,
};
use crate::prefetch::{PrefetchConfig, PrefetchCoordinator};
use crate::worker::{
    spawn_worker, CommandReply, MemoryPartitionStore, ServiceWorker, WorkerCommand, WorkerConfig,
    WorkerHandle,
};

/// Largest request body forwarded to the origin.
const MAX_PROXY_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across all handlers.
///
/// Every member is a cheap handle over shared state, so cloning per request
/// is fine.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: CacheManager,
    pub worker: WorkerHandle,
    pub prefetch: PrefetchCoordinator,
    /// Origin that proxied requests are resolved against
    pub origin: Url,
}

impl AppState {
    pub fn new(
        cache: CacheManager,
        worker: WorkerHandle,
        prefetch: PrefetchCoordinator,
        origin: Url,
    ) -> Self {
        Self {
            cache,
            worker,
            prefetch,
            origin,
        }
    }

    /// Wires the three caches from configuration.
    ///
    /// `fetcher` is the worker's path to the network; the prefetch coordinator
    /// goes through the worker so its responses are cached like page
    /// requests. Returns the state and the worker task handle.
    pub fn from_config(
        config: &Config,
        fetcher: SharedFetcher,
        kv_store: Box<dyn KeyValueStore>,
        clock: SharedClock,
    ) -> std::result::Result<(Self, JoinHandle<()>), url::ParseError> {
        let worker_config = WorkerConfig::try_from(config)?;
        let origin = worker_config.origin.clone();

        let cache = CacheManager::new(KvConfig::from(config), kv_store, clock.clone());
        let (worker, worker_task) = spawn_worker(ServiceWorker::new(
            worker_config,
            Box::new(MemoryPartitionStore::with_max_bytes(config.worker_max_bytes)),
            fetcher,
            clock.clone(),
        ));
        let prefetch = PrefetchCoordinator::new(
            origin.clone(),
            Arc::new(worker.clone()),
            clock,
            PrefetchConfig::default(),
        );

        Ok((Self::new(cache, worker, prefetch, origin), worker_task))
    }
}

// == Key-Value Handlers ==

/// Handler for PUT /kv/:namespace/:key
pub async fn set_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    state.cache.set(&key, req.value, req.ttl, &namespace).await?;
    Ok(Json(SetResponse::new(&namespace, &key)))
}

/// Handler for GET /kv/:namespace/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key, &namespace).await {
        Some(value) => Ok(Json(GetResponse::new(namespace, key, value))),
        None => Err(CacheError::NotFound(format!("{}/{}", namespace, key))),
    }
}

/// Handler for DELETE /kv/:namespace/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Json<DeleteResponse> {
    state.cache.remove(&key, &namespace).await;
    Json(DeleteResponse::new(&namespace, &key))
}

/// Handler for DELETE /kv/:namespace
pub async fn clear_namespace_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<ClearResponse>> {
    let removed = state.cache.clear_namespace(&namespace).await?;
    Ok(Json(ClearResponse::new(
        removed,
        &format!("namespace '{}'", namespace),
    )))
}

/// Handler for DELETE /kv
pub async fn clear_all_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let removed = state.cache.clear_all().await;
    Json(ClearResponse::new(removed, "all namespaces"))
}

// == Worker Handlers ==

/// Handler for POST /worker/message
///
/// The body is a JSON string: `"skipWaiting"` or `"clearCache"`.
pub async fn worker_message_handler(
    State(state): State<AppState>,
    Json(raw): Json<String>,
) -> Result<Json<CommandReply>> {
    let command: WorkerCommand = raw.parse().map_err(CacheError::InvalidRequest)?;
    let reply = state.worker.post_message(command).await?;
    Ok(Json(reply))
}

// == Prefetch Handlers ==

/// Handler for POST /prefetch/products
pub async fn prefetch_list_handler(
    State(state): State<AppState>,
    Json(params): Json<Value>,
) -> Result<Json<Value>> {
    if !params.is_object() {
        return Err(CacheError::InvalidRequest(
            "Listing parameters must be a JSON object".to_string(),
        ));
    }
    let data = state.prefetch.prefetch_list(&params).await?;
    Ok(Json(data))
}

/// Handler for GET /prefetch/products/:id
pub async fn prefetch_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let data = state.prefetch.prefetch_detail(&id).await?;
    Ok(Json(data))
}

/// Handler for POST /prefetch/queue
///
/// Queues the prefetches and returns immediately.
pub async fn prefetch_queue_handler(
    State(state): State<AppState>,
    Json(req): Json<QueueRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>)> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let queued = req.len();
    for id in req.ids {
        state.prefetch.queue_detail(id);
    }
    for params in req.lists {
        state.prefetch.queue_list(params);
    }
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued })))
}

// == Status Handlers ==

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        kv: state.cache.get_stats().await,
        prefetch: state.prefetch.stats().await,
        worker: state.worker.stats().await.ok(),
    })
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

// == Proxy ==

/// Fallback handler: every other request goes through the interception
/// worker to the origin.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_PROXY_BODY_BYTES)
        .await
        .map_err(|e| CacheError::TooLarge(e.to_string()))?;

    let mut url = state.origin.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    let mode = if is_navigation(&parts.method, &headers) {
        RequestMode::Navigate
    } else {
        RequestMode::Other
    };

    let request = fetch::Request {
        method: parts.method,
        url,
        headers,
        body,
        mode,
    };
    let response = state.worker.intercept(request).await?;
    Ok(response.into_response())
}

/// A request is a navigation when the browser says so, or when a GET asks
/// for HTML.
fn is_navigation(method: &Method, headers: &HeaderMap) -> bool {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };

    if header_str("sec-fetch-mode").eq_ignore_ascii_case("navigate") {
        return true;
    }
    *method == Method::GET && header_str(header::ACCEPT.as_str()).contains("text/html")
}

//! API Routes
//!
//! Configures the Axum router with the cache control endpoints and the
//! intercepted proxy fallback.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_all_handler, clear_namespace_handler, delete_handler, get_handler, health_handler,
    prefetch_detail_handler, prefetch_list_handler, prefetch_queue_handler, proxy_handler,
    set_handler, stats_handler, worker_message_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /stats` - Key-value, prefetch and worker statistics
/// - `PUT|GET|DELETE /kv/:namespace/:key` - Key-value entry operations
/// - `DELETE /kv/:namespace` - Clear one namespace
/// - `DELETE /kv` - Clear every namespace
/// - `POST /worker/message` - Post `"skipWaiting"` or `"clearCache"`
/// - `POST /prefetch/products` - Prefetch a product listing
/// - `GET /prefetch/products/:id` - Prefetch one product
/// - `POST /prefetch/queue` - Queue background prefetches
/// - anything else - Intercepted by the worker and proxied to the origin
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/kv", delete(clear_all_handler))
        .route("/kv/:namespace", delete(clear_namespace_handler))
        .route(
            "/kv/:namespace/:key",
            put(set_handler).get(get_handler).delete(delete_handler),
        )
        .route("/worker/message", post(worker_message_handler))
        .route("/prefetch/products", post(prefetch_list_handler))
        .route("/prefetch/products/:id", get(prefetch_detail_handler))
        .route("/prefetch/queue", post(prefetch_queue_handler))
        .fallback(proxy_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

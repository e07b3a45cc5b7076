//! API Module
//!
//! HTTP handlers and routing for the cache service.
//!
//! # Endpoints
//! - `/kv/...` - Application key-value cache
//! - `/worker/message` - Interception worker commands
//! - `/prefetch/...` - Prefetch coordinator
//! - `/stats`, `/health` - Status
//! - fallback - Proxied to the origin through the interception worker

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;

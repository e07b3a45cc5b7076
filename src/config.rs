//! Configuration Module
//!
//! Handles loading and managing service configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

// == Defaults ==
const DEFAULT_SERVER_PORT: u16 = 3000;
const DEFAULT_ORIGIN_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_CACHE_NAMESPACE: &str = "wazhop-v1";
const DEFAULT_KV_PREFIX: &str = "wazhop_cache_";
const DEFAULT_KV_VERSION: &str = "v1";
const DEFAULT_KV_MAX_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_KV_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_KV_SWEEP_INTERVAL: u64 = 60;
const DEFAULT_WORKER_SWEEP_INTERVAL: u64 = 60 * 60;
const DEFAULT_WORKER_MAX_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_PREFETCH_SWEEP_INTERVAL: u64 = 60;

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Upstream origin every intercepted request is forwarded to
    pub origin_url: String,
    /// Versioned build identifier used to name worker partitions
    pub cache_namespace: String,
    /// Key prefix owned by the key-value cache in the persistent store
    pub kv_prefix: String,
    /// Key-value cache schema version
    pub kv_version: String,
    /// Size budget of the key-value cache in bytes
    pub kv_max_bytes: usize,
    /// Default key-value TTL in milliseconds
    pub kv_default_ttl_ms: u64,
    /// Key-value sweep interval in seconds
    pub kv_sweep_interval: u64,
    /// Optional JSON file backing the persistent key-value tier
    pub kv_path: Option<PathBuf>,
    /// Partition TTL sweep interval in seconds
    pub worker_sweep_interval: u64,
    /// Byte budget of the partition store
    pub worker_max_bytes: usize,
    /// Prefetch result-cache sweep interval in seconds
    pub prefetch_sweep_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `ORIGIN_URL` - Upstream origin (default: http://127.0.0.1:5000)
    /// - `CACHE_NAMESPACE` - Worker partition namespace (default: wazhop-v1)
    /// - `KV_PREFIX` - Key-value prefix (default: wazhop_cache_)
    /// - `KV_VERSION` - Key-value version tag (default: v1)
    /// - `KV_MAX_BYTES` - Key-value size budget (default: 5 MiB)
    /// - `KV_DEFAULT_TTL_MS` - Default key-value TTL (default: 300000)
    /// - `KV_SWEEP_INTERVAL` - Key-value sweep seconds (default: 60)
    /// - `WAZHOP_KV_PATH` - File for the persistent tier (default: in memory)
    /// - `WORKER_SWEEP_INTERVAL` - Partition sweep seconds (default: 3600)
    /// - `WORKER_MAX_BYTES` - Partition store budget (default: 50 MiB)
    /// - `PREFETCH_SWEEP_INTERVAL` - Prefetch sweep seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            server_port: parse_var("SERVER_PORT", DEFAULT_SERVER_PORT),
            origin_url: string_var("ORIGIN_URL", DEFAULT_ORIGIN_URL),
            cache_namespace: string_var("CACHE_NAMESPACE", DEFAULT_CACHE_NAMESPACE),
            kv_prefix: string_var("KV_PREFIX", DEFAULT_KV_PREFIX),
            kv_version: string_var("KV_VERSION", DEFAULT_KV_VERSION),
            kv_max_bytes: parse_var("KV_MAX_BYTES", DEFAULT_KV_MAX_BYTES),
            kv_default_ttl_ms: parse_var("KV_DEFAULT_TTL_MS", DEFAULT_KV_TTL_MS),
            kv_sweep_interval: parse_var("KV_SWEEP_INTERVAL", DEFAULT_KV_SWEEP_INTERVAL),
            kv_path: env::var("WAZHOP_KV_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            worker_sweep_interval: parse_var(
                "WORKER_SWEEP_INTERVAL",
                DEFAULT_WORKER_SWEEP_INTERVAL,
            ),
            worker_max_bytes: parse_var("WORKER_MAX_BYTES", DEFAULT_WORKER_MAX_BYTES),
            prefetch_sweep_interval: parse_var(
                "PREFETCH_SWEEP_INTERVAL",
                DEFAULT_PREFETCH_SWEEP_INTERVAL,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            origin_url: DEFAULT_ORIGIN_URL.to_string(),
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            kv_prefix: DEFAULT_KV_PREFIX.to_string(),
            kv_version: DEFAULT_KV_VERSION.to_string(),
            kv_max_bytes: DEFAULT_KV_MAX_BYTES,
            kv_default_ttl_ms: DEFAULT_KV_TTL_MS,
            kv_sweep_interval: DEFAULT_KV_SWEEP_INTERVAL,
            kv_path: None,
            worker_sweep_interval: DEFAULT_WORKER_SWEEP_INTERVAL,
            worker_max_bytes: DEFAULT_WORKER_MAX_BYTES,
            prefetch_sweep_interval: DEFAULT_PREFETCH_SWEEP_INTERVAL,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn string_var(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

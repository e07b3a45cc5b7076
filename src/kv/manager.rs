//! Cache Manager Module
//!
//! Namespaced TTL cache with an in-memory tier mirrored into a persistent
//! key/value store, size-bounded eviction and hit/miss accounting.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{system_clock, SharedClock};
use crate::coalesce::InFlight;
use crate::config::Config;
use crate::error::{CacheError, Result, StorageError};
use crate::kv::stats::Counters;
use crate::kv::{CacheEntry, CacheStats, KeyValueStore, MemoryStore, MAX_KEY_LENGTH};

/// Share of the budget the store is brought under when eviction runs.
const EVICTION_TARGET_NUMERATOR: usize = 4;
const EVICTION_TARGET_DENOMINATOR: usize = 5;

// == Kv Config ==
/// Settings of a `CacheManager`.
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Prefix owned by the cache in the persistent store
    pub prefix: String,
    /// Version tag inserted after the prefix
    pub version: String,
    /// Total size budget in bytes
    pub max_bytes: usize,
    /// TTL applied when `set` is called without one, in milliseconds
    pub default_ttl_ms: u64,
}

impl KvConfig {
    /// Byte level eviction brings the store under.
    pub fn eviction_target(&self) -> usize {
        self.max_bytes * EVICTION_TARGET_NUMERATOR / EVICTION_TARGET_DENOMINATOR
    }

    /// `{prefix}{version}_{namespace}_`
    fn namespace_prefix(&self, namespace: &str) -> String {
        format!("{}{}_{}_", self.prefix, self.version, namespace)
    }

    /// `{prefix}{version}_{namespace}_{key}`
    fn composite_key(&self, key: &str, namespace: &str) -> String {
        format!("{}{}", self.namespace_prefix(namespace), key)
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig::from(&Config::default())
    }
}

impl From<&Config> for KvConfig {
    fn from(config: &Config) -> Self {
        Self {
            prefix: config.kv_prefix.clone(),
            version: config.kv_version.clone(),
            max_bytes: config.kv_max_bytes,
            default_ttl_ms: config.kv_default_ttl_ms,
        }
    }
}

// == Kv State ==
/// Both tiers and the counters, guarded by one lock.
#[derive(Debug)]
struct KvState {
    memory: HashMap<String, CacheEntry>,
    store: Box<dyn KeyValueStore>,
    counters: Counters,
}

impl KvState {
    /// Persisted entries owned by the cache. Corrupt records are removed.
    fn persisted(&mut self, prefix: &str) -> Vec<(String, CacheEntry)> {
        let mut entries = Vec::new();
        let mut corrupt = Vec::new();

        for key in self.store.keys() {
            if !key.starts_with(prefix) {
                continue;
            }
            match self.store.get_item(&key) {
                Ok(Some(raw)) => match CacheEntry::from_json(&raw) {
                    Ok(entry) => entries.push((key, entry)),
                    Err(e) => {
                        warn!("Removing corrupt cache entry {}: {}", key, e);
                        corrupt.push(key);
                    }
                },
                Ok(None) => {}
                Err(e) => warn!("Failed to read cache entry {}: {}", key, e),
            }
        }

        for key in corrupt {
            self.delete(&key);
        }
        entries
    }

    /// Removes a key from both tiers, logging storage failures.
    fn delete(&mut self, key: &str) {
        self.memory.remove(key);
        if let Err(e) = self.store.remove_item(key) {
            warn!("Failed to remove cache entry {}: {}", key, e);
        }
    }

    /// Removes every expired entry from both tiers.
    fn sweep_expired(&mut self, prefix: &str, now: u64) -> usize {
        let mut expired: Vec<String> = self
            .persisted(prefix)
            .into_iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        expired.extend(
            self.memory
                .iter()
                .filter(|(key, entry)| entry.is_expired(now) && !expired.contains(key))
                .map(|(key, _)| key.clone())
                .collect::<Vec<_>>(),
        );

        for key in &expired {
            self.delete(key);
        }
        expired.len()
    }

    /// Evicts oldest entries until `stored + incoming` is below `target`.
    ///
    /// `replacing` names a key about to be overwritten; its current size is
    /// not counted and it is never chosen as a victim.
    fn evict_for(
        &mut self,
        prefix: &str,
        incoming: usize,
        replacing: Option<&str>,
        max_bytes: usize,
        target: usize,
    ) -> usize {
        let mut entries: Vec<(String, CacheEntry)> = self
            .persisted(prefix)
            .into_iter()
            .filter(|(key, _)| Some(key.as_str()) != replacing)
            .collect();
        let mut total: usize = entries.iter().map(|(_, e)| e.size).sum();

        if total + incoming <= max_bytes {
            return 0;
        }

        entries.sort_by(|(ka, a), (kb, b)| {
            a.timestamp.cmp(&b.timestamp).then_with(|| ka.cmp(kb))
        });

        let mut evicted = 0;
        for (key, entry) in entries {
            if total + incoming < target {
                break;
            }
            self.delete(&key);
            total -= entry.size;
            evicted += 1;
        }
        evicted
    }

    fn stored_bytes(&mut self, prefix: &str) -> (usize, usize) {
        let entries = self.persisted(prefix);
        (entries.len(), entries.iter().map(|(_, e)| e.size).sum())
    }
}

// == Cache Manager ==
/// Application key-value cache.
///
/// Cloning is cheap; clones share both tiers, the counters and the in-flight
/// registry.
#[derive(Clone)]
pub struct CacheManager {
    state: Arc<RwLock<KvState>>,
    config: Arc<KvConfig>,
    clock: SharedClock,
    in_flight: InFlight<String, Value, CacheError>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    // == Constructor ==
    /// Creates a cache over `store` and brings the store within budget.
    pub fn new(config: KvConfig, store: Box<dyn KeyValueStore>, clock: SharedClock) -> Self {
        let mut state = KvState {
            memory: HashMap::new(),
            store,
            counters: Counters::default(),
        };

        let evicted = state.evict_for(
            &config.prefix,
            0,
            None,
            config.max_bytes,
            config.eviction_target(),
        );
        if evicted > 0 {
            info!("Evicted {} entries on startup to fit the cache budget", evicted);
        }

        Self {
            state: Arc::new(RwLock::new(state)),
            config: Arc::new(config),
            clock,
            in_flight: InFlight::new(),
        }
    }

    /// Creates a cache over a fresh in-memory store and the system clock.
    pub fn in_memory(config: KvConfig) -> Self {
        Self::new(config, Box::new(MemoryStore::new()), system_clock())
    }

    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    // == Set ==
    /// Stores `value` under `key` in `namespace`.
    ///
    /// Evicts oldest entries first when the write would exceed the budget. A
    /// quota rejection from the persistent tier triggers one expiry sweep and
    /// a single retry. On failure no stale copy of the key is left behind.
    ///
    /// # Arguments
    /// * `key` - The key within the namespace
    /// * `value` - Any serializable value
    /// * `ttl` - TTL in milliseconds (uses the default TTL if None)
    /// * `namespace` - Logical group, e.g. `products`
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: T,
        ttl: Option<u64>,
        namespace: &str,
    ) -> Result<()> {
        validate_key(key)?;
        validate_namespace(namespace)?;

        let value = serde_json::to_value(value)?;
        let ttl = ttl.unwrap_or(self.config.default_ttl_ms);
        let now = self.clock.now_ms();
        let entry = CacheEntry::new(value, ttl, now);

        if entry.size > self.config.max_bytes {
            return Err(CacheError::TooLarge(format!(
                "entry '{}' is {} bytes, budget is {}",
                key, entry.size, self.config.max_bytes
            )));
        }

        let composite = self.config.composite_key(key, namespace);
        let raw = entry.to_json()?;
        let prefix = &self.config.prefix;

        let mut state = self.state.write().await;

        let evicted = state.evict_for(
            prefix,
            entry.size,
            Some(&composite),
            self.config.max_bytes,
            self.config.eviction_target(),
        );
        if evicted > 0 {
            debug!("Evicted {} entries to make room for {}", evicted, composite);
            state.counters.record_evictions(evicted);
        }

        let written = match state.store.set_item(&composite, &raw) {
            Err(e) if e.is_quota() => {
                warn!("Storage quota hit writing {}, sweeping expired entries", composite);
                let swept = state.sweep_expired(prefix, now);
                state.counters.record_evictions(swept);
                state.store.set_item(&composite, &raw)
            }
            other => other,
        };

        if let Err(e) = written {
            warn!("Failed to persist cache entry {}: {}", composite, e);
            state.delete(&composite);
            return Err(CacheError::Storage(e));
        }

        state.memory.insert(composite, entry);
        state.counters.record_set();
        Ok(())
    }

    // == Get ==
    /// Retrieves a value.
    ///
    /// Returns `None` when there is no valid entry, so a cached `null` comes
    /// back as `Some(Value::Null)`. Expired or corrupt entries are deleted.
    pub async fn get(&self, key: &str, namespace: &str) -> Option<Value> {
        let composite = self.config.composite_key(key, namespace);
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        if let Some(entry) = state.memory.get(&composite) {
            if !entry.is_expired(now) {
                let value = entry.value.clone();
                state.counters.record_hit();
                return Some(value);
            }
            state.memory.remove(&composite);
        }

        match state.store.get_item(&composite) {
            Ok(Some(raw)) => match CacheEntry::from_json(&raw) {
                Ok(entry) if !entry.is_expired(now) => {
                    let value = entry.value.clone();
                    state.memory.insert(composite, entry);
                    state.counters.record_hit();
                    return Some(value);
                }
                Ok(_) => state.delete(&composite),
                Err(e) => {
                    warn!("Removing corrupt cache entry {}: {}", composite, e);
                    state.delete(&composite);
                }
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to read cache entry {}: {}", composite, e),
        }

        state.counters.record_miss();
        None
    }

    // == Remove ==
    /// Deletes a key from both tiers. Missing keys are ignored.
    pub async fn remove(&self, key: &str, namespace: &str) {
        let composite = self.config.composite_key(key, namespace);
        self.state.write().await.delete(&composite);
    }

    // == Clear Namespace ==
    /// Deletes every entry in `namespace`; other namespaces are untouched.
    ///
    /// Returns the number of keys removed.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        validate_namespace(namespace)?;
        let prefix = self.config.namespace_prefix(namespace);
        let removed = self.clear_matching(&prefix).await;
        info!("Cleared {} entries from namespace '{}'", removed, namespace);
        Ok(removed)
    }

    // == Clear All ==
    /// Deletes every entry under the cache prefix and resets the counters.
    ///
    /// Store keys outside the prefix belong to other state and are kept.
    pub async fn clear_all(&self) -> usize {
        let prefix = self.config.prefix.clone();
        let removed = self.clear_matching(&prefix).await;
        self.state.write().await.counters.reset();
        info!("Cleared {} cache entries", removed);
        removed
    }

    async fn clear_matching(&self, prefix: &str) -> usize {
        let mut state = self.state.write().await;
        let mut keys: Vec<String> = state
            .store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in state.memory.keys() {
            if key.starts_with(prefix) && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        for key in &keys {
            state.delete(key);
        }
        keys.len()
    }

    // == Get Or Set ==
    /// Returns the cached value, or runs `fetcher`, caches its output and
    /// returns it.
    ///
    /// Concurrent calls for the same key share one `fetcher` invocation. A
    /// value that cannot be cached is still returned.
    pub async fn get_or_set<F, Fut, T, E>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<u64>,
        namespace: &str,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        if let Some(value) = self.get(key, namespace).await {
            return Ok(value);
        }

        let composite = self.config.composite_key(key, namespace);
        let manager = self.clone();
        let key = key.to_string();
        let namespace = namespace.to_string();

        let (pending, _) = self.in_flight.start(composite, async move {
            let produced = fetcher()
                .await
                .map_err(|e| CacheError::Fetcher(e.to_string()))?;
            let value = serde_json::to_value(produced)?;
            if let Err(e) = manager.set(&key, value.clone(), ttl, &namespace).await {
                warn!("Value for {}/{} was produced but not cached: {}", namespace, key, e);
            }
            Ok(value)
        });

        pending.await
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from both tiers.
    ///
    /// Returns the number of entries removed; each counts as an eviction.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        let removed = state.sweep_expired(&self.config.prefix, now);
        state.counters.record_evictions(removed);
        removed
    }

    // == Enforce Budget ==
    /// Evicts oldest entries if the store exceeds its budget.
    pub async fn enforce_budget(&self) -> usize {
        let mut state = self.state.write().await;
        let evicted = state.evict_for(
            &self.config.prefix,
            0,
            None,
            self.config.max_bytes,
            self.config.eviction_target(),
        );
        state.counters.record_evictions(evicted);
        evicted
    }

    // == Stats ==
    /// Returns current counters and tier sizes.
    pub async fn get_stats(&self) -> CacheStats {
        let mut state = self.state.write().await;
        let (storage_entries, total_bytes) = state.stored_bytes(&self.config.prefix);
        CacheStats::new(
            state.counters,
            state.memory.len(),
            storage_entries,
            total_bytes,
        )
    }

    /// Number of entries currently held in the in-memory tier.
    pub async fn memory_len(&self) -> usize {
        self.state.read().await.memory.len()
    }

    /// Reads a raw persisted record. Intended for diagnostics.
    pub async fn raw_item(
        &self,
        key: &str,
        namespace: &str,
    ) -> std::result::Result<Option<String>, StorageError> {
        let composite = self.config.composite_key(key, namespace);
        self.state.read().await.store.get_item(&composite)
    }
}

// == Validation ==
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Namespaces may not contain `_`, which separates the composite key parts;
/// otherwise clearing `user` would also clear `user_x`.
fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(CacheError::InvalidRequest(
            "Namespace cannot be empty".to_string(),
        ));
    }
    if namespace.contains('_') {
        return Err(CacheError::InvalidRequest(format!(
            "Namespace '{}' may not contain '_'",
            namespace
        )));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::test_support::SharedStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START: u64 = 1_700_000_000_000;

    fn manager_with(store: MemoryStore, max_bytes: usize) -> (CacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let config = KvConfig {
            max_bytes,
            ..KvConfig::default()
        };
        let manager = CacheManager::new(config, Box::new(store), clock.clone());
        (manager, clock)
    }

    fn manager() -> (CacheManager, Arc<ManualClock>) {
        manager_with(MemoryStore::new(), 5 * 1024 * 1024)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (cache, _) = manager();

        cache.set("k", "v1", Some(60_000), "products").await.unwrap();
        assert_eq!(cache.get("k", "products").await, Some(json!("v1")));
    }

    #[tokio::test]
    async fn test_persisted_key_layout() {
        let (cache, _) = manager();
        cache.set("lagos", json!({"lat": 6.5}), Some(1_000), "geo").await.unwrap();

        let raw = cache.raw_item("lagos", "geo").await.unwrap().unwrap();
        let entry = CacheEntry::from_json(&raw).unwrap();
        assert_eq!(entry.value, json!({"lat": 6.5}));
        assert_eq!(entry.timestamp, START);
        assert_eq!(entry.ttl, 1_000);
        assert_eq!(
            cache.config().composite_key("lagos", "geo"),
            "wazhop_cache_v1_geo_lagos"
        );
    }

    #[tokio::test]
    async fn test_cached_falsy_values_are_hits() {
        let (cache, _) = manager();

        cache.set("null", Value::Null, None, "user").await.unwrap();
        cache.set("zero", 0, None, "user").await.unwrap();
        cache.set("false", false, None, "user").await.unwrap();

        assert_eq!(cache.get("null", "user").await, Some(Value::Null));
        assert_eq!(cache.get("zero", "user").await, Some(json!(0)));
        assert_eq!(cache.get("false", "user").await, Some(json!(false)));
        assert_eq!(cache.get("absent", "user").await, None);
    }

    #[tokio::test]
    async fn test_ttl_expiry_boundary() {
        let (cache, clock) = manager();
        cache.set("k", "v", Some(1_000), "shop").await.unwrap();

        clock.advance(999);
        assert_eq!(cache.get("k", "shop").await, Some(json!("v")));

        clock.advance(1);
        assert_eq!(cache.get("k", "shop").await, None);
        assert!(cache.raw_item("k", "shop").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_rehydrates_memory_from_store() {
        let clock = Arc::new(ManualClock::new(START));
        let mut store = MemoryStore::new();
        let entry = CacheEntry::new(json!("persisted"), 60_000, START);
        store
            .set_item("wazhop_cache_v1_shop_k", &entry.to_json().unwrap())
            .unwrap();

        let cache = CacheManager::new(KvConfig::default(), Box::new(store), clock);
        assert_eq!(cache.memory_len().await, 0);

        assert_eq!(cache.get("k", "shop").await, Some(json!("persisted")));
        assert_eq!(cache.memory_len().await, 1);
        assert_eq!(cache.get_stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss_and_deleted() {
        let clock = Arc::new(ManualClock::new(START));
        let mut store = MemoryStore::new();
        store.set_item("wazhop_cache_v1_shop_bad", "{oops").unwrap();

        let cache = CacheManager::new(KvConfig::default(), Box::new(store), clock);
        assert_eq!(cache.get("bad", "shop").await, None);
        assert!(cache.raw_item("bad", "shop").await.unwrap().is_none());
        assert_eq!(cache.get_stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (cache, _) = manager();
        cache.set("k", 1, None, "user").await.unwrap();

        cache.remove("k", "user").await;
        cache.remove("k", "user").await;
        assert_eq!(cache.get("k", "user").await, None);
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let (cache, _) = manager();
        cache.set("k", "v1", Some(60_000), "products").await.unwrap();
        cache.set("k", "u1", Some(60_000), "user").await.unwrap();

        let removed = cache.clear_namespace("user").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get("k", "products").await, Some(json!("v1")));
        assert_eq!(cache.get("k", "user").await, None);
    }

    #[tokio::test]
    async fn test_invalid_namespace_rejected() {
        let (cache, _) = manager();
        assert!(matches!(
            cache.set("k", 1, None, "user_x").await,
            Err(CacheError::InvalidRequest(_))
        ));
        assert!(cache.clear_namespace("").await.is_err());
        assert!(cache.set("", 1, None, "user").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_all_keeps_foreign_keys_and_resets_counters() {
        let clock = Arc::new(ManualClock::new(START));
        let mut store = MemoryStore::new();
        store.set_item("auth_token", "secret").unwrap();
        let cache = CacheManager::new(KvConfig::default(), Box::new(store), clock);

        cache.set("a", 1, None, "shop").await.unwrap();
        cache.set("b", 2, None, "marketplace").await.unwrap();
        let _ = cache.get("a", "shop").await;
        let _ = cache.get("zzz", "shop").await;

        assert_eq!(cache.clear_all().await, 2);

        let stats = cache.get_stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.storage_entries, 0);
        assert_eq!(stats.memory_entries, 0);

        let state = cache.state.read().await;
        assert_eq!(
            state.store.get_item("auth_token").unwrap(),
            Some("secret".to_string())
        );
    }

    #[tokio::test]
    async fn test_stats_hit_rate() {
        let (cache, _) = manager();
        cache.set("k", "v", None, "shop").await.unwrap();

        for _ in 0..3 {
            assert!(cache.get("missing", "shop").await.is_none());
        }
        for _ in 0..2 {
            assert!(cache.get("k", "shop").await.is_some());
        }

        let stats = cache.get_stats().await;
        assert_eq!(stats.hit_rate, "40.00%");
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn test_fresh_manager_hit_rate_is_zero() {
        let (cache, _) = manager();
        assert_eq!(cache.get_stats().await.hit_rate, "0.00%");
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_first() {
        let (cache, clock) = manager_with(MemoryStore::new(), 1_000);
        let payload = "x".repeat(150);

        // Each entry is a little over 200 bytes; the fifth overflows 1000.
        for i in 0..5 {
            cache
                .set(&format!("k{i}"), payload.as_str(), Some(600_000), "products")
                .await
                .unwrap();
            clock.advance(10);
        }

        let stats = cache.get_stats().await;
        assert!(stats.total_bytes < 800, "total {} not under 80%", stats.total_bytes);
        assert!(stats.evictions > 0);

        // Survivors are the newest entries
        assert!(cache.get("k0", "products").await.is_none());
        assert!(cache.get("k4", "products").await.is_some());
        assert!(cache.get("k3", "products").await.is_some());
    }

    #[tokio::test]
    async fn test_entry_larger_than_budget_rejected() {
        let (cache, _) = manager_with(MemoryStore::new(), 100);
        let result = cache.set("big", "x".repeat(200), None, "shop").await;
        assert!(matches!(result, Err(CacheError::TooLarge(_))));
    }

    #[tokio::test]
    async fn test_startup_eviction_brings_store_under_budget() {
        let clock = Arc::new(ManualClock::new(START));
        let mut store = MemoryStore::new();
        for i in 0..10u64 {
            let entry = CacheEntry::new(json!("y".repeat(100)), 600_000, START + i);
            store
                .set_item(&format!("wazhop_cache_v1_shop_{i}"), &entry.to_json().unwrap())
                .unwrap();
        }

        let config = KvConfig {
            max_bytes: 800,
            ..KvConfig::default()
        };
        let cache = CacheManager::new(config, Box::new(store), clock);

        let stats = cache.get_stats().await;
        assert!(stats.total_bytes < 640);
        assert!(cache.get("9", "shop").await.is_some());
        assert!(cache.get("0", "shop").await.is_none());
    }

    #[tokio::test]
    async fn test_quota_error_triggers_cleanup_and_retry() {
        let (cache, clock) = manager_with(MemoryStore::with_quota(400), 5 * 1024 * 1024);

        cache.set("old", "a".repeat(200), Some(100), "shop").await.unwrap();
        clock.advance(200);

        // Would exceed the quota unless the expired entry is swept first
        cache.set("new", "b".repeat(200), Some(60_000), "shop").await.unwrap();

        assert_eq!(cache.get("new", "shop").await, Some(json!("b".repeat(200))));
        assert_eq!(cache.get_stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_quota_error_after_retry_returns_error() {
        let (cache, _) = manager_with(MemoryStore::with_quota(300), 5 * 1024 * 1024);
        cache.set("a", "a".repeat(200), Some(60_000), "shop").await.unwrap();

        let result = cache.set("b", "b".repeat(200), Some(60_000), "shop").await;
        assert!(matches!(
            result,
            Err(CacheError::Storage(StorageError::QuotaExceeded(_)))
        ));
        assert!(cache.get("b", "shop").await.is_none());
        assert!(cache.get("a", "shop").await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_expired_counts_evictions() {
        let (cache, clock) = manager();
        cache.set("short", 1, Some(100), "shop").await.unwrap();
        cache.set("long", 2, Some(100_000), "shop").await.unwrap();

        clock.advance(500);
        assert_eq!(cache.cleanup_expired().await, 1);

        let stats = cache.get_stats().await;
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.storage_entries, 1);
        assert_eq!(stats.memory_entries, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_fetches_once_then_hits() {
        let (cache, _) = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let value = cache
                .get_or_set(
                    "lagos",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(json!({"lat": 6.52, "lng": 3.37}))
                    },
                    Some(60_000),
                    "geo",
                )
                .await
                .unwrap();
            assert_eq!(value["lat"], json!(6.52));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_coalesces_concurrent_calls() {
        let (cache, _) = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        let producer = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>("abuja")
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_set("city", producer(calls.clone()), None, "geo"),
            cache.get_or_set("city", producer(calls.clone()), None, "geo"),
        );

        assert_eq!(a.unwrap(), json!("abuja"));
        assert_eq!(b.unwrap(), json!("abuja"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_recovers_after_producer_panic() {
        let (cache, _) = manager();

        let first = cache
            .get_or_set(
                "city",
                || async {
                    if true {
                        panic!("geocoder bug");
                    }
                    Ok::<Value, String>(Value::Null)
                },
                None,
                "geo",
            )
            .await;
        assert!(matches!(first, Err(CacheError::Internal(_))));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let second = cache
            .get_or_set(
                "city",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("lagos")
                },
                None,
                "geo",
            )
            .await;

        assert_eq!(second.unwrap(), json!("lagos"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enforce_budget_after_external_writes() {
        let shared = SharedStore::default();
        let clock = Arc::new(ManualClock::new(START));
        let config = KvConfig {
            max_bytes: 1_000,
            ..KvConfig::default()
        };
        let cache = CacheManager::new(config, Box::new(shared.clone()), clock);

        // Another writer fills the store past the budget behind the manager
        for i in 0..10u64 {
            let entry = CacheEntry::new(json!("y".repeat(100)), 600_000, START + i);
            shared
                .insert(&format!("wazhop_cache_v1_shop_{i}"), &entry.to_json().unwrap());
        }
        shared.insert("unrelated_setting", "dark");
        assert!(cache.get_stats().await.total_bytes > 1_000);

        let evicted = cache.enforce_budget().await;
        assert!(evicted > 0);

        let stats = cache.get_stats().await;
        assert!(stats.total_bytes < 800, "total {} not under 80%", stats.total_bytes);
        assert_eq!(stats.evictions, evicted as u64);
        assert!(cache.get("0", "shop").await.is_none());
        assert!(cache.get("9", "shop").await.is_some());
        assert_eq!(shared.get("unrelated_setting"), Some("dark".to_string()));

        // Nothing left to do once under budget
        assert_eq!(cache.enforce_budget().await, 0);
    }

    #[tokio::test]
    async fn test_get_or_set_propagates_fetcher_error() {
        let (cache, _) = manager();
        let result = cache
            .get_or_set("k", || async { Err::<Value, _>("geocoder down") }, None, "geo")
            .await;

        assert!(matches!(result, Err(CacheError::Fetcher(msg)) if msg == "geocoder down"));
        assert!(cache.get("k", "geo").await.is_none());
    }
}

//! Partition Storage
//!
//! Named response buckets owned by the interception worker, keyed by request
//! identity (method + URL).

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::debug;

use crate::error::StorageError;
use crate::fetch::{Request, Response};

/// Synthetic header recording when a response was stored (Unix ms).
pub const CACHED_AT_HEADER: &str = "sw-cached-at";

const MINUTE_MS: u64 = 60 * 1000;
const DAY_MS: u64 = 24 * 60 * MINUTE_MS;

// == Partition Kind ==
/// The four partitions and their retention windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    Static,
    Dynamic,
    Images,
    Api,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 4] = [
        PartitionKind::Static,
        PartitionKind::Dynamic,
        PartitionKind::Images,
        PartitionKind::Api,
    ];

    /// Partitions subject to the age-based sweep. Static assets only go away
    /// with a version change.
    pub const SWEPT: [PartitionKind; 3] = [
        PartitionKind::Api,
        PartitionKind::Dynamic,
        PartitionKind::Images,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Dynamic => "dynamic",
            PartitionKind::Images => "images",
            PartitionKind::Api => "api",
        }
    }

    /// Maximum age of an entry in milliseconds.
    pub fn max_age_ms(self) -> u64 {
        match self {
            PartitionKind::Static => 30 * DAY_MS,
            PartitionKind::Dynamic => 7 * DAY_MS,
            PartitionKind::Api => 5 * MINUTE_MS,
            PartitionKind::Images => 30 * DAY_MS,
        }
    }
}

// == Partition Names ==
/// Maps partition kinds to concrete names for one build namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    namespace: String,
}

impl PartitionNames {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `"{namespace}-{suffix}"`
    pub fn name(&self, kind: PartitionKind) -> String {
        format!("{}-{}", self.namespace, kind.suffix())
    }

    pub fn all(&self) -> Vec<String> {
        PartitionKind::ALL.iter().map(|k| self.name(*k)).collect()
    }

    /// True for one of the four current partition names.
    pub fn is_current(&self, name: &str) -> bool {
        PartitionKind::ALL.iter().any(|k| self.name(*k) == name)
    }

    /// True for any partition belonging to this namespace.
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(&format!("{}-", self.namespace))
    }

    /// Application-wide prefix shared by every build: the namespace up to and
    /// including its last `-` (`wazhop-v1` → `wazhop-`).
    pub fn app_prefix(&self) -> String {
        match self.namespace.rfind('-') {
            Some(idx) => self.namespace[..=idx].to_string(),
            None => format!("{}-", self.namespace),
        }
    }
}

// == Request Key ==
/// Identity of a cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
        }
    }
}

impl From<&Request> for RequestKey {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method.as_str().to_string(),
            url: request.url.to_string(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Reads the `sw-cached-at` timestamp of a stored response.
pub fn cached_at(response: &Response) -> Option<u64> {
    response.header(CACHED_AT_HEADER)?.parse().ok()
}

// == Partition Store Trait ==
/// Storage of named partitions, in the shape of the browser Cache Storage API.
pub trait PartitionStore: Send + Sync + fmt::Debug {
    /// Creates the partition if it does not exist.
    fn open(&mut self, name: &str);

    /// Names of every existing partition.
    fn partition_names(&self) -> Vec<String>;

    /// Deletes a whole partition. Returns false if it did not exist.
    fn delete_partition(&mut self, name: &str) -> bool;

    /// Looks up a response in one partition.
    fn get(&self, name: &str, key: &RequestKey) -> Option<Response>;

    /// Stores a response, creating the partition if needed.
    fn put(&mut self, name: &str, key: RequestKey, response: Response) -> Result<(), StorageError>;

    /// Removes one response. Returns whether it existed.
    fn delete(&mut self, name: &str, key: &RequestKey) -> Result<bool, StorageError>;

    /// Keys stored in one partition.
    fn keys(&self, name: &str) -> Vec<RequestKey>;

    /// Looks up a response in every partition, in name order.
    fn match_any(&self, key: &RequestKey) -> Option<Response> {
        self.partition_names()
            .iter()
            .find_map(|name| self.get(name, key))
    }
}

// == Memory Partition Store ==
/// In-memory partition store with an optional byte budget across all
/// partitions.
///
/// A write that would break the budget first evicts the oldest entries from
/// non-static partitions; it is refused only when that cannot free enough.
#[derive(Debug, Default)]
pub struct MemoryPartitionStore {
    partitions: BTreeMap<String, HashMap<RequestKey, Response>>,
    max_bytes: Option<usize>,
}

impl MemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes that would take the store past `max_bytes`.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            partitions: BTreeMap::new(),
            max_bytes: Some(max_bytes),
        }
    }

    /// Bytes currently held (URLs plus response bodies and headers).
    pub fn used_bytes(&self) -> usize {
        self.partitions
            .values()
            .flat_map(|p| p.iter())
            .map(|(k, r)| entry_size(k, r))
            .sum()
    }
}

impl MemoryPartitionStore {
    /// Frees at least `needed` bytes by evicting the oldest stamped entries
    /// outside static partitions, skipping the entry about to be replaced.
    ///
    /// Nothing is evicted when even a full eviction would not free enough;
    /// the evictable byte count is returned as the error instead.
    fn make_room(&mut self, name: &str, replacing: &RequestKey, needed: usize) -> Result<usize, usize> {
        let mut candidates: Vec<(u64, String, RequestKey, usize)> = Vec::new();
        for (partition, entries) in &self.partitions {
            if is_pinned(partition) {
                continue;
            }
            for (key, response) in entries {
                if partition == name && key == replacing {
                    continue;
                }
                candidates.push((
                    cached_at(response).unwrap_or(0),
                    partition.clone(),
                    key.clone(),
                    entry_size(key, response),
                ));
            }
        }

        let available: usize = candidates.iter().map(|(_, _, _, size)| size).sum();
        if available < needed {
            return Err(available);
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));
        let mut freed = 0;
        let mut evicted = 0;
        for (_, partition, key, size) in candidates {
            if freed >= needed {
                break;
            }
            if let Some(entries) = self.partitions.get_mut(&partition) {
                entries.remove(&key);
            }
            freed += size;
            evicted += 1;
        }
        debug!("Evicted {} responses to free {} bytes", evicted, freed);
        Ok(evicted)
    }
}

/// Static partitions hold the precached shell and are only replaced by a
/// version change.
fn is_pinned(partition: &str) -> bool {
    partition
        .strip_suffix(PartitionKind::Static.suffix())
        .is_some_and(|rest| rest.ends_with('-'))
}

fn entry_size(key: &RequestKey, response: &Response) -> usize {
    key.method.len() + key.url.len() + response.byte_size()
}

impl PartitionStore for MemoryPartitionStore {
    fn open(&mut self, name: &str) {
        self.partitions.entry(name.to_string()).or_default();
    }

    fn partition_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    fn delete_partition(&mut self, name: &str) -> bool {
        self.partitions.remove(name).is_some()
    }

    fn get(&self, name: &str, key: &RequestKey) -> Option<Response> {
        self.partitions.get(name)?.get(key).cloned()
    }

    fn put(&mut self, name: &str, key: RequestKey, response: Response) -> Result<(), StorageError> {
        if let Some(max_bytes) = self.max_bytes {
            let replaced = self
                .partitions
                .get(name)
                .and_then(|p| p.get(&key))
                .map(|r| entry_size(&key, r))
                .unwrap_or(0);
            let projected = self.used_bytes() - replaced + entry_size(&key, &response);
            if projected > max_bytes {
                self.make_room(name, &key, projected - max_bytes)
                    .map_err(|available| {
                        StorageError::QuotaExceeded(format!(
                            "storing {key} needs {projected} bytes, budget is {max_bytes} \
                             and only {available} bytes are evictable"
                        ))
                    })?;
            }
        }
        self.partitions
            .entry(name.to_string())
            .or_default()
            .insert(key, response);
        Ok(())
    }

    fn delete(&mut self, name: &str, key: &RequestKey) -> Result<bool, StorageError> {
        Ok(self
            .partitions
            .get_mut(name)
            .map(|p| p.remove(key).is_some())
            .unwrap_or(false))
    }

    fn keys(&self, name: &str) -> Vec<RequestKey> {
        self.partitions
            .get(name)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }
}

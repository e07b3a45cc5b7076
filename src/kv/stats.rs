//! Cache Statistics Module
//!
//! Tracks key-value cache performance: hits, misses, sets and evictions.

use serde::Serialize;

// == Counters ==
/// Running counters since construction or the last `clear_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

impl Counters {
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// == Cache Stats ==
/// Snapshot returned by `CacheManager::get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of successful reads
    pub hits: u64,
    /// Number of reads that found nothing valid
    pub misses: u64,
    /// Number of successful writes
    pub sets: u64,
    /// Number of entries removed by expiry sweeps or budget eviction
    pub evictions: u64,
    /// Hit rate formatted as a percentage with two decimals, e.g. `"40.00%"`
    pub hit_rate: String,
    /// Entries currently held in the in-memory tier
    pub memory_entries: usize,
    /// Entries currently held in the persistent tier
    pub storage_entries: usize,
    /// Sum of the size estimates of persisted entries
    pub total_bytes: usize,
}

impl CacheStats {
    pub fn new(
        counters: Counters,
        memory_entries: usize,
        storage_entries: usize,
        total_bytes: usize,
    ) -> Self {
        Self {
            hits: counters.hits,
            misses: counters.misses,
            sets: counters.sets,
            evictions: counters.evictions,
            hit_rate: format_hit_rate(counters.hits, counters.misses),
            memory_entries,
            storage_entries,
            total_bytes,
        }
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses) as a percentage string, "0.00%" when no
/// reads have been made.
pub fn format_hit_rate(hits: u64, misses: u64) -> String {
    let total = hits + misses;
    let rate = if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    };
    format!("{rate:.2}%")
}

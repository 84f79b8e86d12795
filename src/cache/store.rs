//! TTL cache for semi-static reference data.
//!
//! [`CacheStore`] keeps the decoded `data` payload of successful reads,
//! keyed on [`ApiRequest::key()`](crate::ApiRequest::key). Freshness is
//! decided at read time: an entry is valid iff `now - stored_at < TTL(category)`.
//! There is no background sweep; an expired entry is dropped by the read
//! that finds it.
//!
//! Capacity is bounded by `max_entries`. When an insert pushes the store over
//! the limit, the entry with the oldest insertion (or last overwrite) is
//! evicted. This is insertion order, not access order.
//!
//! Time comes from [`tokio::time::Instant`], so tests can drive expiry with
//! `tokio::time::pause()` / `advance()`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;
use crate::types::{CacheCategory, TtlTable};

/// Configuration for the cache store.
///
/// ```rust
/// # use coachway::{CacheCategory, CacheConfig, TtlTable};
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(200)
///     .ttl(TtlTable::default().with(CacheCategory::Cities, Duration::from_secs(600)));
/// assert_eq!(config.max_entries, 200);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 500.
    pub max_entries: usize,
    /// Per-category time-to-live.
    pub ttl: TtlTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: TtlTable::default(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Replace the whole TTL table.
    pub fn ttl(mut self, ttl: TtlTable) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    category: CacheCategory,
    payload: Value,
    stored_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<String, CacheEntry>,
    /// insertion sequence → key; first entry is the eviction candidate
    order: BTreeMap<u64, String>,
    next_seq: u64,
    /// Bumped by `clear()`; writes tagged with an older epoch are dropped.
    epoch: u64,
}

impl Entries {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.by_key.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// In-memory response cache with category-driven TTL.
pub struct CacheStore {
    config: CacheConfig,
    entries: Mutex<Entries>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a fresh payload.
    ///
    /// Returns `None` when the key is absent or its entry has outlived the
    /// TTL of `category`; an expired entry is removed on the way out.
    pub fn get(&self, key: &str, category: CacheCategory) -> Option<Value> {
        let ttl = self.config.ttl.get(category);
        let mut entries = self.lock();

        let (fresh, expired) = match entries.by_key.get(key) {
            Some(entry) if entry.stored_at.elapsed() < ttl => (Some(entry.payload.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            entries.remove(key);
            debug!(key, %category, "cache entry expired");
        }
        drop(entries);

        let counter = if fresh.is_some() {
            telemetry::CACHE_HITS_TOTAL
        } else {
            telemetry::CACHE_MISSES_TOTAL
        };
        metrics::counter!(counter, "category" => category.as_str()).increment(1);
        fresh
    }

    /// Insert or overwrite an entry, stamped with the current time.
    pub fn set(&self, key: impl Into<String>, category: CacheCategory, payload: Value) {
        let mut entries = self.lock();
        self.insert(&mut entries, key.into(), category, payload);
    }

    /// Current clear-epoch. Capture it before a fetch goes out and hand it
    /// to [`set_if_current`](Self::set_if_current) when the fetch settles.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Like [`set`](Self::set), but only while no [`clear`](Self::clear) has
    /// happened since `epoch` was read. Returns whether the entry was stored.
    pub fn set_if_current(
        &self,
        key: impl Into<String>,
        category: CacheCategory,
        payload: Value,
        epoch: u64,
    ) -> bool {
        let key = key.into();
        let mut entries = self.lock();
        if entries.epoch != epoch {
            debug!(key = %key, "cache cleared while fetching, discarding result");
            return false;
        }
        self.insert(&mut entries, key, category, payload);
        true
    }

    fn insert(&self, entries: &mut Entries, key: String, category: CacheCategory, payload: Value) {
        entries.remove(&key);

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.order.insert(seq, key.clone());
        entries.by_key.insert(
            key,
            CacheEntry {
                category,
                payload,
                stored_at: Instant::now(),
                seq,
            },
        );

        while entries.by_key.len() > self.config.max_entries {
            let Some((_, oldest)) = entries.order.pop_first() else {
                break;
            };
            entries.by_key.remove(&oldest);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
            debug!(key = %oldest, "cache full, evicted oldest entry");
        }
    }

    /// Drop a single key. Returns whether an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry stored under `category`. Returns how many were removed.
    pub fn invalidate_category(&self, category: CacheCategory) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<String> = entries
            .by_key
            .iter()
            .filter(|(_, entry)| entry.category == category)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        doomed.len()
    }

    /// Evict all entries.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.by_key.clear();
        entries.order.clear();
        entries.epoch += 1;
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn hit_before_ttl_miss_after() {
        let store = CacheStore::new(
            CacheConfig::new()
                .ttl(TtlTable::default().with(CacheCategory::Cities, Duration::from_secs(60))),
        );
        store.set("allCities", CacheCategory::Cities, json!(["Ankara"]));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            store.get("allCities", CacheCategory::Cities),
            Some(json!(["Ankara"]))
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("allCities", CacheCategory::Cities), None);
        assert!(store.is_empty(), "expired entry is dropped by the read");
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_invalid_exactly_at_ttl() {
        let store = CacheStore::new(
            CacheConfig::new()
                .ttl(TtlTable::default().with(CacheCategory::Routes, Duration::from_secs(10))),
        );
        store.set("r", CacheCategory::Routes, json!(1));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.get("r", CacheCategory::Routes), None);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_restamps_entry() {
        let store = CacheStore::new(
            CacheConfig::new()
                .ttl(TtlTable::default().with(CacheCategory::Routes, Duration::from_secs(10))),
        );
        store.set("r", CacheCategory::Routes, json!(1));
        tokio::time::advance(Duration::from_secs(8)).await;
        store.set("r", CacheCategory::Routes, json!(2));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("r", CacheCategory::Routes), Some(json!(2)));
    }

    #[test]
    fn evicts_oldest_insertion_when_full() {
        let store = CacheStore::new(CacheConfig::new().max_entries(2));
        store.set("a", CacheCategory::Default, json!("a"));
        store.set("b", CacheCategory::Default, json!("b"));
        // reading "a" does not protect it: order is insertion, not access
        assert!(store.get("a", CacheCategory::Default).is_some());
        store.set("c", CacheCategory::Default, json!("c"));

        assert_eq!(store.len(), 2);
        assert!(store.get("a", CacheCategory::Default).is_none());
        assert!(store.get("b", CacheCategory::Default).is_some());
        assert!(store.get("c", CacheCategory::Default).is_some());
    }

    #[test]
    fn overwrite_moves_entry_to_back_of_eviction_order() {
        let store = CacheStore::new(CacheConfig::new().max_entries(2));
        store.set("a", CacheCategory::Default, json!(1));
        store.set("b", CacheCategory::Default, json!(2));
        store.set("a", CacheCategory::Default, json!(3));
        store.set("c", CacheCategory::Default, json!(4));

        assert!(store.get("b", CacheCategory::Default).is_none());
        assert_eq!(store.get("a", CacheCategory::Default), Some(json!(3)));
    }

    #[test]
    fn invalidate_category_leaves_others() {
        let store = CacheStore::default();
        store.set("allCities", CacheCategory::Cities, json!([]));
        store.set("/routes?from=A", CacheCategory::Routes, json!([]));
        store.set("/routes?from=B", CacheCategory::Routes, json!([]));

        assert_eq!(store.invalidate_category(CacheCategory::Routes), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("allCities", CacheCategory::Cities).is_some());
    }

    #[test]
    fn invalidate_and_clear() {
        let store = CacheStore::default();
        store.set("a", CacheCategory::Default, json!(1));
        store.set("b", CacheCategory::Default, json!(2));

        assert!(store.invalidate("a"));
        assert!(!store.invalidate("a"));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn write_started_before_clear_is_dropped() {
        let store = CacheStore::default();
        let before = store.epoch();
        store.clear();

        assert!(!store.set_if_current("profile", CacheCategory::Default, json!("alice"), before));
        assert!(store.is_empty());

        let after = store.epoch();
        assert!(store.set_if_current("profile", CacheCategory::Default, json!("bob"), after));
        assert_eq!(
            store.get("profile", CacheCategory::Default),
            Some(json!("bob"))
        );
    }
}

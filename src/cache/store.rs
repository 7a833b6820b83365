//! TTL entry storage.
//!
//! A plain map behind a std `RwLock`. Guards are never held across an await,
//! so every operation here is synchronous. Expired entries stay in the map
//! until a lookup touches them or `purge_expired` is called.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CachedValue};
use super::lock::{rw_read, rw_write};
use super::stats::CacheStats;

const SOURCE: &str = "cache::store";

/// Result of a typed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// A live entry of the requested type.
    Hit(T),
    /// No entry under the key.
    Miss,
    /// An entry existed but its TTL had elapsed; it has been evicted.
    Expired,
    /// A live entry exists but holds a different type.
    TypeMismatch,
}

impl<T> Lookup<T> {
    pub fn into_hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct TtlStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` as a `T`, evicting it if it has expired.
    pub fn get<T>(&self, key: &str) -> Lookup<T>
    where
        T: Clone + 'static,
    {
        let now = Instant::now();
        let stored_at = {
            let entries = rw_read(&self.entries, SOURCE, "get");
            let Some(entry) = entries.get(key) else {
                return Lookup::Miss;
            };
            if !entry.is_expired(now) {
                return match entry.value::<T>() {
                    Some(value) => Lookup::Hit(value),
                    None => {
                        warn!(
                            cache_key = key,
                            expected = std::any::type_name::<T>(),
                            "Cached value has a different type; treating as miss"
                        );
                        Lookup::TypeMismatch
                    }
                };
            }
            entry.stored_at()
        };

        // Only evict the entry we saw; a concurrent writer may have replaced it.
        let mut entries = rw_write(&self.entries, SOURCE, "get.evict");
        if entries
            .get(key)
            .is_some_and(|entry| entry.stored_at() == stored_at && entry.is_expired(now))
        {
            entries.remove(key);
            debug!(cache_key = key, "Evicted expired entry");
        }
        Lookup::Expired
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert<T>(&self, key: impl Into<String>, value: T, ttl: Duration)
    where
        T: CachedValue,
    {
        let entry = CacheEntry::new(value, Instant::now(), ttl);
        rw_write(&self.entries, SOURCE, "insert").insert(key.into(), entry);
    }

    /// Remove a single entry. Returns whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "remove")
            .remove(key)
            .is_some()
    }

    /// Remove every entry, or only those whose key contains `pattern`.
    ///
    /// Matching is a case-sensitive substring test. Returns the number of
    /// entries removed.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let before = entries.len();
        match pattern {
            None => entries.clear(),
            Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
        }
        before - entries.len()
    }

    /// Drop every entry whose TTL has elapsed. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains_key").contains_key(key)
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate size and expiry information over all stored entries.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "stats");
        CacheStats::collect(entries.iter(), now)
    }
}

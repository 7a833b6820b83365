//! Read-through query cache.
//!
//! Wraps the TTL store with the fetch-on-miss path. Fetch failures are
//! returned to the caller unchanged and never stored.

use std::future::Future;
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::single_flight::KeyGates;
use super::stats::CacheStats;
use super::store::{Lookup, TtlStore};

const METRIC_CACHE_HIT: &str = "readthrough_cache_hit_total";
const METRIC_CACHE_MISS: &str = "readthrough_cache_miss_total";
const METRIC_CACHE_COALESCED: &str = "readthrough_cache_coalesced_total";
const METRIC_CACHE_FETCH_ERROR: &str = "readthrough_cache_fetch_error_total";
const METRIC_CACHE_ENTRIES: &str = "readthrough_cache_entries";

/// TTL store plus the read-through policy that fills it.
pub struct QueryCache {
    config: CacheConfig,
    store: TtlStore,
    gates: Option<KeyGates>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let gates = config.single_flight.then(KeyGates::new);
        Self {
            config,
            store: TtlStore::new(),
            gates,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &TtlStore {
        &self.store
    }

    /// Return the live value under `key`, or run `fetch` and cache its
    /// success for `ttl`.
    ///
    /// Without single-flight, concurrent misses on one key each run their
    /// own `fetch`; the last one to finish wins the slot.
    #[instrument(level = "debug", skip_all, fields(cache_key = key))]
    pub async fn cached_query<T, E, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Duration,
    ) -> Result<T, E>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup::<T>(key) {
            return Ok(value);
        }

        let _gate = match &self.gates {
            Some(gates) => {
                let guard = gates.enter(key).await;
                if let Some(value) = self.store.get::<T>(key).into_hit() {
                    counter!(METRIC_CACHE_COALESCED).increment(1);
                    debug!("Miss coalesced behind in-flight fetch");
                    return Ok(value);
                }
                Some(guard)
            }
            None => None,
        };

        let value = fetch().await.inspect_err(|_| {
            counter!(METRIC_CACHE_FETCH_ERROR).increment(1);
            debug!("Fetch failed; nothing cached");
        })?;

        self.store.insert(key, value.clone(), ttl);
        gauge!(METRIC_CACHE_ENTRIES).set(self.store.len() as f64);
        debug!(ttl_ms = ttl.as_millis() as u64, "Stored fetched value");

        Ok(value)
    }

    /// `cached_query` with the configured default TTL.
    pub async fn cached_query_default<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cached_query(key, fetch, self.config.default_ttl())
            .await
    }

    /// Remove all entries, or those whose key contains `pattern`.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let removed = self.store.clear(pattern);
        gauge!(METRIC_CACHE_ENTRIES).set(self.store.len() as f64);
        debug!(pattern, removed, "Cache cleared");
        removed
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.store.remove(key);
        if removed {
            gauge!(METRIC_CACHE_ENTRIES).set(self.store.len() as f64);
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let purged = self.store.purge_expired();
        gauge!(METRIC_CACHE_ENTRIES).set(self.store.len() as f64);
        purged
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    fn lookup<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        match self.store.get::<T>(key) {
            Lookup::Hit(value) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!("Cache hit");
                Some(value)
            }
            outcome => {
                let expired = matches!(outcome, Lookup::Expired);
                if expired {
                    gauge!(METRIC_CACHE_ENTRIES).set(self.store.len() as f64);
                }
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(expired, "Cache miss");
                None
            }
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

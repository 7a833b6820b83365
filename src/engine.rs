//! Query engine handle.
//!
//! One engine owns one TTL store and one batch coordinator. It is built once
//! and cloned into whatever needs it; clones share state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::batch::{BatchCoordinator, BatchHandle, FlushReport};
use crate::cache::{CacheConfig, CacheStats, PageRequest, Paginated, QueryCache};

#[derive(Clone)]
pub struct QueryEngine {
    cache: Arc<QueryCache>,
    batches: Arc<BatchCoordinator>,
}

impl QueryEngine {
    pub fn new(config: CacheConfig) -> Self {
        let batches = Arc::new(BatchCoordinator::new(config.batch_delay()));
        info!(
            default_ttl_ms = config.default_ttl_ms,
            page_ttl_ms = config.page_ttl_ms,
            batch_delay_ms = batches.delay().as_millis() as u64,
            single_flight = config.single_flight,
            "Query engine built"
        );
        Self {
            cache: Arc::new(QueryCache::new(config)),
            batches,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        self.cache.config()
    }

    /// Read `key` through the cache, calling `fetch` on a miss and storing
    /// a successful result for `ttl`.
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
        self.cache.cached_query(key, fetch, ttl).await
    }

    pub async fn cached_query_default<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cache.cached_query_default(key, fetch).await
    }

    /// Register `fetch` for the next batch flush.
    ///
    /// Registration happens on this call, before the handle is polled.
    pub fn batch_query<T, E, F, Fut>(
        &self,
        group_id: &str,
        request_key: &str,
        fetch: F,
    ) -> BatchHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.batches.register(group_id, request_key, fetch)
    }

    pub async fn paginated_query<T, E, F, Fut>(
        &self,
        key: &str,
        fetch_page: F,
        request: PageRequest,
    ) -> Result<Paginated<T>, E>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce(u64, u32) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        self.cache.paginated_query(key, fetch_page, request).await
    }

    /// Remove every entry, or only those whose key contains `pattern`.
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.cache.clear(pattern)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pending_batch_requests(&self) -> usize {
        self.batches.pending_requests()
    }

    pub fn batch_timer_armed(&self) -> bool {
        self.batches.timer_armed()
    }

    /// Flush pending batch requests now instead of waiting for the timer.
    pub async fn flush_batches(&self) -> Option<FlushReport> {
        self.batches.flush_now().await
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

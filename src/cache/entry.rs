//! Stored cache entries.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::size::serialized_len;

/// A value the store can hold: downcastable back to its concrete type and
/// able to estimate its own serialized size.
pub trait CachedValue: Any + Send + Sync {
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    /// Serialized size in bytes, or `None` if the value cannot be serialized.
    fn estimated_size(&self) -> Option<usize>;
}

impl<T> CachedValue for T
where
    T: Serialize + Send + Sync + 'static,
{
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn estimated_size(&self) -> Option<usize> {
        serialized_len(self)
    }
}

/// One cached value with the instant it was stored and its time-to-live.
#[derive(Clone)]
pub struct CacheEntry {
    value: Arc<dyn CachedValue>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new<T: CachedValue>(value: T, stored_at: Instant, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            stored_at,
            ttl,
        }
    }

    /// An entry is expired once `ttl` has fully elapsed since it was stored.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }

    /// Clone the value out if it was stored as a `T`.
    pub fn value<T>(&self) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.value.as_any().downcast_ref::<T>().cloned()
    }

    pub fn estimated_size(&self) -> Option<usize> {
        self.value.estimated_size()
    }

    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("stored_at", &self.stored_at)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

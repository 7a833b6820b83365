//! Read-only aggregation over stored entries.

use serde::Serialize;
use tokio::time::Instant;

use super::entry::CacheEntry;

/// Snapshot of the store's size and approximate memory cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet evicted.
    pub size: usize,
    /// Sum of key length plus serialized value length, in bytes.
    pub memory_usage: usize,
    /// Entries whose TTL has elapsed but that are still stored.
    pub expired_entries: usize,
    /// Entries whose value could not be serialized; only their key length
    /// is counted in `memory_usage`.
    pub unsized_entries: usize,
}

impl CacheStats {
    pub(crate) fn collect<'a, I>(entries: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a CacheEntry)>,
    {
        entries
            .into_iter()
            .fold(CacheStats::default(), |mut stats, (key, entry)| {
                stats.size += 1;
                stats.memory_usage = stats.memory_usage.saturating_add(key.len());
                match entry.estimated_size() {
                    Some(bytes) => stats.memory_usage = stats.memory_usage.saturating_add(bytes),
                    None => stats.unsized_entries += 1,
                }
                if entry.is_expired(now) {
                    stats.expired_entries += 1;
                }
                stats
            })
    }
}

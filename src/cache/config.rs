//! Engine configuration.
//!
//! Controls TTLs, the batch debounce window and the miss policy via the
//! `[cache]` table of `readthrough.toml`.

use std::time::Duration;

use serde::Deserialize;

// Default values for engine configuration
const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_PAGE_TTL_MS: u64 = 60 * 1000;
const DEFAULT_BATCH_DELAY_MS: u64 = 10;

/// Engine configuration from `readthrough.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used by `cached_query_default`.
    pub default_ttl_ms: u64,
    /// Fixed TTL for paginated reads, independent of caller TTLs.
    pub page_ttl_ms: u64,
    /// Debounce window between the first batch registration and the flush.
    pub batch_delay_ms: u64,
    /// Serialize concurrent misses for the same key behind one fetch.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            page_ttl_ms: DEFAULT_PAGE_TTL_MS,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            single_flight: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl_ms: duration_ms(settings.default_ttl),
            page_ttl_ms: duration_ms(settings.page_ttl),
            batch_delay_ms: duration_ms(settings.batch_delay),
            single_flight: settings.single_flight,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn page_ttl(&self) -> Duration {
        Duration::from_millis(self.page_ttl_ms)
    }

    /// Debounce window, clamped to at least one millisecond so a flush
    /// always yields to registrations made in the same tick.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms.max(1))
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

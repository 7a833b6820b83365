//! Read-through TTL cache.
//!
//! Values of any serializable type are stored under string keys with a
//! per-entry time-to-live:
//!
//! - **Store**: key → entry map; expired entries are evicted lazily on lookup
//! - **Query cache**: fetch-on-miss path, optional per-key single-flight
//! - **Pagination**: `(offset, limit)` pages cached under derived keys
//! - **Stats**: entry count and approximate serialized size
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_ttl_ms = 300000
//! page_ttl_ms = 60000
//! batch_delay_ms = 10
//! single_flight = false
//! ```

mod config;
mod entry;
mod lock;
mod pagination;
mod query;
mod single_flight;
mod size;
mod stats;
mod store;

pub use config::CacheConfig;
pub use entry::{CacheEntry, CachedValue};
pub use pagination::{PageRequest, Paginated};
pub use query::QueryCache;
pub use size::serialized_len;
pub use stats::CacheStats;
pub use store::{Lookup, TtlStore};

pub(crate) use lock::mutex_lock;

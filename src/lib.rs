//! In-process read-through TTL cache with debounced request batching.
//!
//! [`engine::QueryEngine`] is the entry point: it owns one TTL store and one
//! batch coordinator, and is cheap to clone.

pub mod application;
pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod infra;

pub use batch::{BatchError, BatchHandle, FlushReport};
pub use cache::{CacheConfig, CacheStats, PageRequest, Paginated};
pub use engine::QueryEngine;

//! Request batching.
//!
//! Callers register fetches under a group id; everything registered within
//! one delay window is flushed together by a single timer:
//!
//! - **Coordinator**: group table, timer arming, window detachment
//! - **Pending**: type-erased queued fetch and the caller's handle
//! - **Executor**: concurrent execution with per-request isolation

mod coordinator;
mod error;
mod executor;
mod pending;

pub use coordinator::BatchCoordinator;
pub use error::BatchError;
pub use executor::{Epoch, FlushReport};
pub use pending::BatchHandle;

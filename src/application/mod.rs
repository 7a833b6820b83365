//! Application layer: the probe workload and top-level errors.

pub mod error;
pub mod probe;

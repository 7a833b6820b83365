//! Per-key gates that serialize concurrent misses for the same key.
//!
//! A caller that misses takes the key's gate before fetching. Callers queued
//! behind it re-check the store once they get through and usually hit.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyGates {
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn enter(&self, key: &str) -> KeyGateGuard<'_> {
        // Clone under the shard lock so cleanup sees an accurate count.
        let gate = self
            .gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Built before waiting so a cancelled waiter still prunes the slot.
        let mut guard = KeyGateGuard {
            gates: self,
            key: key.to_string(),
            permit: None,
        };
        guard.permit = Some(gate.lock_owned().await);
        guard
    }

    /// Number of keys with a gate currently held or awaited.
    pub fn active(&self) -> usize {
        self.gates.len()
    }
}

/// Holds a key's gate; releases it and drops the map slot when no one else
/// is waiting.
pub struct KeyGateGuard<'a> {
    gates: &'a KeyGates,
    key: String,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGateGuard<'_> {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.gates
            .gates
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

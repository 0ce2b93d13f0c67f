//! Per-key async mutual exclusion.
//!
//! Used per session id (draft creation) and per order id (status changes).
//! Entries are dropped once no holder or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;

        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held while the key is locked
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .map(|slot| Arc::strong_count(slot) == 1)
            .unwrap_or(false)
        {
            slots.remove(&self.key);
        }
    }
}

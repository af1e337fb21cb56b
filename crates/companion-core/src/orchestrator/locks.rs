//! Per-conversation advisory locks.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Unused lock entries are pruned once the map grows past this size
const MAX_IDLE_LOCKS: usize = 1000;

/// One async mutex per rendered conversation key. Holding the guard
/// serializes seeding and turn writes for that key only.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. The guard is owned so it can move
    /// into the task that finishes the turn.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= MAX_IDLE_LOCKS {
                // Only the map holds a reference: nobody owns or awaits it
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

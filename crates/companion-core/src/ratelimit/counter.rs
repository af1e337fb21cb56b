//! ============================================================================
//! Rate Counters - Atomic increment-with-expiry per identity
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Expired windows are swept once the map grows past this many identities
const MAX_TRACKED_IDENTITIES: usize = 10_000;

/// Counter state for one identity in its current window
#[derive(Debug, Clone, PartialEq)]
pub struct RateWindow {
    pub identity: String,
    pub window_start: Instant,
    pub count: u32,
}

/// Shared counter backend. `increment` must be atomic: two concurrent calls
/// for the same identity never observe the same count.
#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Count one hit for `identity`, starting a new window when the current
    /// one is older than `window`. Returns the state after the increment.
    async fn increment(&self, identity: &str, window: Duration) -> Result<RateWindow>;
}

/// Process-local counter store
#[derive(Default, Clone)]
pub struct InMemoryCounterStore {
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities currently tracked
    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateCounterStore for InMemoryCounterStore {
    async fn increment(&self, identity: &str, window: Duration) -> Result<RateWindow> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if windows.len() >= MAX_TRACKED_IDENTITIES {
            windows.retain(|_, w| now.duration_since(w.window_start) < window);
        }

        let entry = windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow {
                identity: identity.to_string(),
                window_start: now,
                count: 0,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);

        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counts_within_window() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(10);

        assert_eq!(store.increment("a", window).await.unwrap().count, 1);
        assert_eq!(store.increment("a", window).await.unwrap().count, 2);
        assert_eq!(store.increment("b", window).await.unwrap().count, 1);
        assert_eq!(store.tracked().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_expiry() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(10);

        store.increment("a", window).await.unwrap();
        store.increment("a", window).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let state = store.increment("a", window).await.unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.identity, "a");
    }
}

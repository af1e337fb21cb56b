//! ============================================================================
//! Rate Limiter - Fixed-window admission per caller identity
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, warn};

use super::counter::RateCounterStore;
use crate::config::RateLimitConfig;
use crate::error::ChatError;

pub struct RateLimiter {
    counters: Arc<dyn RateCounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn RateCounterStore>, config: RateLimitConfig) -> Self {
        Self { counters, config }
    }

    /// Admit or deny one request for `identity`.
    /// At most `capacity` requests are admitted per window.
    pub async fn admit(&self, identity: &str) -> Result<bool, ChatError> {
        let state = self
            .counters
            .increment(identity, self.config.window())
            .await
            .map_err(ChatError::store)?;

        let allowed = state.count <= self.config.capacity;
        if allowed {
            debug!("Admitted {} ({}/{})", identity, state.count, self.config.capacity);
        } else {
            warn!("Rate limit hit for {} ({} in window)", identity, state.count);
        }
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::InMemoryCounterStore;
    use std::time::Duration;

    fn limiter(capacity: u32) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitConfig {
                capacity,
                window_secs: 10,
            },
        ))
    }

    #[tokio::test]
    async fn test_exactly_capacity_of_concurrent_calls_admitted() {
        let capacity = 10;
        let limiter = limiter(capacity);

        let handles: Vec<_> = (0..=capacity)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit("/chat/ada-user_1").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, capacity);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.admit("/chat/ada-user_1").await.unwrap());
        assert!(!limiter.admit("/chat/ada-user_1").await.unwrap());
        assert!(limiter.admit("/chat/ada-user_2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_again_after_window() {
        let limiter = limiter(1);
        assert!(limiter.admit("id").await.unwrap());
        assert!(!limiter.admit("id").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.admit("id").await.unwrap());
    }
}

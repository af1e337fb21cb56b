//! ============================================================================
//! History Store - Short-term, append-only turn buffer per conversation
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ConversationKey, Turn};

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a turn; never evicts
    async fn append(&self, key: &ConversationKey, turn: Turn) -> Result<()>;

    /// Up to `limit` newest turns, oldest first
    async fn read_recent(&self, key: &ConversationKey, limit: usize) -> Result<Vec<Turn>>;
}

//! ============================================================================
//! Database Types - Summaries reported by CompanionDb
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::ConversationKey;

/// One stored conversation and how many turns it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub turns: usize,
}

/// Database-wide counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_conversations: usize,
    pub total_turns: usize,
    pub total_personas: usize,
    pub total_persona_messages: usize,
}

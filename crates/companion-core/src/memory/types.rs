//! ============================================================================
//! Memory Types - Long-term memory records
//! ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A passage stored in the long-term index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,
    /// Vector embedding (not returned by searches)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Partition the record is searched under
    pub source_file_id: String,
    /// Owning conversation scope, None for ingested documents visible to
    /// every conversation in the partition
    pub conversation: Option<String>,
    /// Unix timestamp when the record was written
    pub created_at: i64,
}

impl MemoryRecord {
    pub fn new(content: String, source_file_id: String, conversation: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            embedding: Vec::new(),
            source_file_id,
            conversation,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Attach a pre-computed embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// A search hit, ordered by descending score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub content: String,
    pub score: f32,
}

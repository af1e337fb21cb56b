//! ============================================================================
//! Local Index - In-process cosine similarity index
//! ============================================================================
//! Brute-force nearest-neighbour search over records held in memory. Used when
//! no Qdrant URL is configured and by tests. Nothing is persisted.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::store::VectorIndex;
use super::types::{MemoryRecord, ScoredPassage};

#[derive(Default, Clone)]
pub struct LocalIndex {
    partitions: Arc<RwLock<HashMap<String, Vec<MemoryRecord>>>>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all partitions
    pub async fn len(&self) -> usize {
        self.partitions.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn upsert(&self, record: &MemoryRecord) -> Result<()> {
        if record.embedding.is_empty() {
            return Err(anyhow!("Cannot store memory without embedding"));
        }

        let mut partitions = self.partitions.write().await;
        let records = partitions.entry(record.source_file_id.clone()).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn query(
        &self,
        source_file_id: &str,
        conversation: Option<&str>,
        embedding: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<ScoredPassage>> {
        let partitions = self.partitions.read().await;
        let Some(records) = partitions.get(source_file_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredPassage> = records
            .iter()
            .filter(|r| match r.conversation.as_deref() {
                None => true,
                owner => owner == conversation,
            })
            .map(|r| ScoredPassage {
                content: r.content.clone(),
                score: cosine_similarity(&embedding, &r.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k as usize);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

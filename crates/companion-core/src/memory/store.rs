//! ============================================================================
//! Memory Store - Long-term index contract and its Qdrant backend
//! ============================================================================
//! Records are partitioned by `source_file_id`; queries never cross partitions.
//! Inside a partition, conversation turns are visible only to the conversation
//! that wrote them. Ingested documents carry no conversation and are shared.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::embeddings::EMBEDDING_DIM;
use super::types::{MemoryRecord, ScoredPassage};

/// Collection name for long-term memories
pub const COLLECTION_NAME: &str = "companion_memories";

/// Query/write contract against a similarity index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, record: &MemoryRecord) -> Result<()>;

    /// Nearest neighbours inside one partition, best match first. Only shared
    /// records and those owned by `conversation` are candidates.
    async fn query(
        &self,
        source_file_id: &str,
        conversation: Option<&str>,
        embedding: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<ScoredPassage>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Long-term index backed by Qdrant vector database
pub struct QdrantIndex {
    client: Qdrant,
}

impl QdrantIndex {
    /// Create a new index, connecting to Qdrant
    pub async fn new(url: &str) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| anyhow!("Failed to create Qdrant client: {}", e))?;

        let index = Self { client };

        // Ensure collection exists
        index.ensure_collection().await?;

        Ok(index)
    }

    /// Ensure the memories collection exists
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(COLLECTION_NAME)
            .await
            .map_err(|e| anyhow!("Failed to check collection existence: {}", e))?;

        if !exists {
            info!("Creating collection: {}", COLLECTION_NAME);

            self.client
                .create_collection(
                    CreateCollectionBuilder::new(COLLECTION_NAME)
                        .vectors_config(VectorParamsBuilder::new(
                            EMBEDDING_DIM as u64,
                            Distance::Cosine,
                        )),
                )
                .await
                .map_err(|e| anyhow!("Failed to create collection: {}", e))?;

            info!("Collection {} created successfully", COLLECTION_NAME);
        } else {
            debug!("Collection {} already exists", COLLECTION_NAME);
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, record: &MemoryRecord) -> Result<()> {
        if record.embedding.is_empty() {
            return Err(anyhow!("Cannot store memory without embedding"));
        }

        debug!("Upserting memory {} into {}", record.id, record.source_file_id);

        let mut payload: HashMap<String, Value> = [
            ("content".to_string(), Value::from(record.content.clone())),
            (
                "source_file_id".to_string(),
                Value::from(record.source_file_id.clone()),
            ),
            ("created_at".to_string(), Value::from(record.created_at)),
        ]
        .into_iter()
        .collect();
        if let Some(conversation) = &record.conversation {
            payload.insert("conversation".to_string(), Value::from(conversation.clone()));
        }

        let point = PointStruct::new(
            record.id.to_string(),
            record.embedding.clone(),
            payload,
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(COLLECTION_NAME, vec![point]))
            .await
            .map_err(|e| anyhow!("Failed to upsert memory: {}", e))?;

        Ok(())
    }

    async fn query(
        &self,
        source_file_id: &str,
        conversation: Option<&str>,
        embedding: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<ScoredPassage>> {
        debug!("Searching {} (top_k: {})", source_file_id, top_k);

        let filter = visibility_filter(source_file_id, conversation);

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(COLLECTION_NAME, embedding, top_k)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .map_err(|e| anyhow!("Failed to search memories: {}", e))?;

        // Qdrant already returns hits best-first
        let passages: Vec<ScoredPassage> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                Some(ScoredPassage {
                    content: get_string(&point.payload, "content")?,
                    score: point.score,
                })
            })
            .collect();

        debug!("Found {} matching passages", passages.len());
        Ok(passages)
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Partition match plus: no owning conversation, or the caller's own
fn visibility_filter(source_file_id: &str, conversation: Option<&str>) -> Filter {
    let mut visible = vec![Condition::is_empty("conversation")];
    if let Some(conversation) = conversation {
        visible.push(Condition::matches("conversation", conversation.to_string()));
    }

    Filter::must([
        Condition::matches("source_file_id", source_file_id.to_string()),
        Filter::should(visible).into(),
    ])
}

fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
}

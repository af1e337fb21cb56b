//! ============================================================================
//! Memory Manager - Composes recent history with the long-term index
//! ============================================================================
//! Built once at startup and shared behind an `Arc` for the process lifetime.
//! Writes go to the recent buffer first; only then is the line embedded and
//! indexed, so the index never holds a line the buffer does not.
//! ============================================================================

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::embeddings::{create_embedding_service, Embedder};
use super::history::HistoryStore;
use super::local::LocalIndex;
use super::store::{QdrantIndex, VectorIndex};
use super::types::MemoryRecord;
use crate::config::{CompanionConfig, MemoryConfig};
use crate::error::ChatError;
use crate::types::{ConversationKey, Turn};

/// Memory manager combining the recent buffer, embeddings and long-term index
pub struct MemoryManager {
    history: Arc<dyn HistoryStore>,
    index: Option<Arc<dyn VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: MemoryConfig,
}

impl MemoryManager {
    /// Create a manager from already-connected components.
    /// Long-term memory is active only when both `index` and `embedder` are set.
    pub fn new(
        history: Arc<dyn HistoryStore>,
        index: Option<Arc<dyn VectorIndex>>,
        embedder: Option<Arc<dyn Embedder>>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            history,
            index,
            embedder,
            config,
        }
    }

    /// Connect the long-term backends described by `config`.
    /// Without an embedding key long-term memory is disabled; without a
    /// Qdrant URL it lives in an in-process index.
    pub async fn connect(config: &CompanionConfig, history: Arc<dyn HistoryStore>) -> Result<Self> {
        let embedder = create_embedding_service(config)
            .map(|service| Arc::new(service) as Arc<dyn Embedder>);

        let index = match (&config.qdrant_url, &embedder) {
            (Some(url), Some(_)) => {
                let index = QdrantIndex::new(url).await?;
                info!("Long-term memory connected (Qdrant: {})", url);
                Some(Arc::new(index) as Arc<dyn VectorIndex>)
            }
            (None, Some(_)) => {
                warn!("QDRANT_URL not set - long-term memory kept in process only");
                Some(Arc::new(LocalIndex::new()) as Arc<dyn VectorIndex>)
            }
            (_, None) => {
                warn!("No embedding API key available - long-term memory disabled");
                None
            }
        };

        Ok(Self::new(history, index, embedder, config.memory.clone()))
    }

    /// Whether writes are also indexed and searches can return passages
    pub fn long_term_enabled(&self) -> bool {
        self.index.is_some() && self.embedder.is_some()
    }

    /// Newest-bounded window of the recent buffer, oldest line first.
    /// Bounded by entry count and character budget, whichever binds first.
    pub async fn read_latest_history(&self, key: &ConversationKey) -> Result<Vec<String>, ChatError> {
        let turns = self
            .history
            .read_recent(key, self.config.history_window_entries)
            .await
            .map_err(ChatError::store)?;

        let lines: Vec<String> = turns.into_iter().map(|t| t.content).collect();
        Ok(bound_by_chars(lines, self.config.history_window_chars))
    }

    /// Write the persona's opening text into an empty buffer, one turn per
    /// delimiter-separated segment. Callers check emptiness first.
    pub async fn seed_chat_history(
        &self,
        seed_text: &str,
        delimiter: &str,
        key: &ConversationKey,
    ) -> Result<usize, ChatError> {
        let mut written = 0;
        for segment in seed_text.split(delimiter) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            self.history
                .append(key, Turn::seed(segment))
                .await
                .map_err(ChatError::store)?;
            written += 1;
        }

        debug!("Seeded {} lines into {}", written, key);
        Ok(written)
    }

    /// Append one turn to the recent buffer, then index it under
    /// `source_file_id`. Failures are surfaced, never retried.
    pub async fn write_to_history(
        &self,
        turn: Turn,
        key: &ConversationKey,
        source_file_id: &str,
    ) -> Result<(), ChatError> {
        let content = turn.content.clone();
        self.history
            .append(key, turn)
            .await
            .map_err(ChatError::store)?;

        let (Some(index), Some(embedder)) = (&self.index, &self.embedder) else {
            return Ok(());
        };

        let embedding = embedder.embed(&content).await.map_err(ChatError::store)?;
        let record = MemoryRecord::new(content, source_file_id.to_string(), Some(key.scope()))
            .with_embedding(embedding);
        index.upsert(&record).await.map_err(ChatError::store)?;

        debug!("Indexed memory {} for {}", record.id, key);
        Ok(())
    }

    /// Top-K passages similar to `query_text` within one partition, best first.
    /// Only ingested documents and turns written under `key` are candidates.
    /// Degrades to an empty result instead of failing.
    pub async fn vector_search(
        &self,
        query_text: &str,
        key: &ConversationKey,
        source_file_id: &str,
    ) -> Vec<String> {
        let top_k = self.config.vector_top_k;
        let (Some(index), Some(embedder)) = (&self.index, &self.embedder) else {
            return Vec::new();
        };
        if top_k == 0 || query_text.trim().is_empty() {
            return Vec::new();
        }

        let embedding = match embedder.embed(query_text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Query embedding failed, continuing without recall: {}", e);
                return Vec::new();
            }
        };

        match index.query(source_file_id, Some(&key.scope()), embedding, top_k).await {
            Ok(hits) => hits.into_iter().map(|hit| hit.content).collect(),
            Err(e) => {
                warn!("Vector search in {} failed, continuing without recall: {}", source_file_id, e);
                Vec::new()
            }
        }
    }

    /// Split a background document into passages and index each one
    pub async fn index_document(&self, source_file_id: &str, text: &str) -> Result<usize, ChatError> {
        let (Some(index), Some(embedder)) = (&self.index, &self.embedder) else {
            return Err(ChatError::StoreUnavailable(
                "long-term memory is not configured".to_string(),
            ));
        };

        let passages = chunk_text(text, self.config.ingest_chunk_chars);
        for passage in &passages {
            let embedding = embedder.embed(passage).await.map_err(ChatError::store)?;
            let record = MemoryRecord::new(passage.clone(), source_file_id.to_string(), None)
                .with_embedding(embedding);
            index.upsert(&record).await.map_err(ChatError::store)?;
        }

        info!("Indexed {} passages into {}", passages.len(), source_file_id);
        Ok(passages.len())
    }

    /// Check if the long-term backend is healthy (true when disabled)
    pub async fn health_check(&self) -> bool {
        match &self.index {
            Some(index) => index.health_check().await.unwrap_or(false),
            None => true,
        }
    }
}

/// Keep the newest lines whose newline-joined length fits `max_chars`.
/// An oversized newest line is cut down to its last `max_chars` characters.
fn bound_by_chars(lines: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0;

    for line in lines.into_iter().rev() {
        let len = line.chars().count();
        let cost = if kept.is_empty() { len } else { len + 1 };
        if used + cost <= max_chars {
            used += cost;
            kept.push(line);
            continue;
        }
        if kept.is_empty() && max_chars > 0 {
            kept.push(line.chars().skip(len - max_chars).collect());
        }
        break;
    }

    kept.reverse();
    kept
}

/// Pack blank-line separated paragraphs into passages of at most `max_chars`.
/// Paragraphs longer than the limit are hard-split.
fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = paragraph.chars().count();
        let current_len = current.chars().count();

        if !current.is_empty() && current_len + 2 + para_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }

        if para_len > max_chars {
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CompanionDb;
    use crate::memory::LocalIndex;
    use crate::test_support::{FailingIndex, KeywordEmbedder};
    use crate::types::TurnRole;

    fn key() -> ConversationKey {
        ConversationKey::new("ada", "user_1", "llama2-13b")
    }

    fn config() -> MemoryConfig {
        MemoryConfig {
            history_window_entries: 30,
            history_window_chars: 8000,
            vector_top_k: 3,
            ingest_chunk_chars: 1000,
        }
    }

    fn manager_with_index(index: Arc<dyn VectorIndex>) -> (MemoryManager, CompanionDb) {
        let db = CompanionDb::in_memory().unwrap();
        let manager = MemoryManager::new(
            Arc::new(db.clone()),
            Some(index),
            Some(Arc::new(KeywordEmbedder)),
            config(),
        );
        (manager, db)
    }

    #[tokio::test]
    async fn test_reads_back_writes_in_order() {
        let (manager, _db) = manager_with_index(Arc::new(LocalIndex::new()));
        assert!(manager.read_latest_history(&key()).await.unwrap().is_empty());

        for i in 0..5 {
            manager
                .write_to_history(Turn::user(format!("User: message {}", i)), &key(), "ada.txt")
                .await
                .unwrap();
        }

        let lines = manager.read_latest_history(&key()).await.unwrap();
        let expected: Vec<String> = (0..5).map(|i| format!("User: message {}", i)).collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_window_bounds_entries() {
        let db = CompanionDb::in_memory().unwrap();
        let mut cfg = config();
        cfg.history_window_entries = 3;
        let manager = MemoryManager::new(Arc::new(db), None, None, cfg);

        for i in 0..10 {
            manager
                .write_to_history(Turn::user(i.to_string()), &key(), "ada.txt")
                .await
                .unwrap();
        }
        assert_eq!(manager.read_latest_history(&key()).await.unwrap(), vec!["7", "8", "9"]);
    }

    #[test]
    fn test_bound_by_chars() {
        let lines = vec!["aaaa".to_string(), "bb".to_string(), "cc".to_string()];
        // "bb\ncc" = 5 chars
        assert_eq!(bound_by_chars(lines.clone(), 5), vec!["bb", "cc"]);
        assert_eq!(bound_by_chars(lines.clone(), 100), lines);
        assert_eq!(bound_by_chars(vec!["abcdef".to_string()], 3), vec!["def"]);
        assert!(bound_by_chars(lines, 0).is_empty());
    }

    #[tokio::test]
    async fn test_seed_splits_on_delimiter() {
        let (manager, db) = manager_with_index(Arc::new(LocalIndex::new()));
        let written = manager
            .seed_chat_history("Ada: Hello.\n\nUser: Hi!\n\n\n\nAda: Welcome.", "\n\n", &key())
            .await
            .unwrap();
        assert_eq!(written, 3);

        let turns = db.all_turns(&key()).unwrap();
        assert!(turns.iter().all(|t| t.role == TurnRole::Seed));
        assert_eq!(turns[2].content, "Ada: Welcome.");
    }

    #[tokio::test]
    async fn test_write_indexes_after_append() {
        let index = Arc::new(LocalIndex::new());
        let (manager, db) = manager_with_index(index.clone());

        manager
            .write_to_history(Turn::user("User: I love engines"), &key(), "ada.txt")
            .await
            .unwrap();

        assert_eq!(db.all_turns(&key()).unwrap().len(), 1);
        assert_eq!(index.len().await, 1);

        let hits = manager.vector_search("engines", &key(), "ada.txt").await;
        assert_eq!(hits, vec!["User: I love engines"]);
    }

    #[tokio::test]
    async fn test_recall_stays_within_conversation() {
        let (manager, _db) = manager_with_index(Arc::new(LocalIndex::new()));
        let other = ConversationKey::new("ada", "user_2", "llama2-13b");

        manager
            .index_document("ada.txt", "Ada kept notes about her bank and the engine.")
            .await
            .unwrap();
        manager
            .write_to_history(Turn::user("User: my bank password is hunter2"), &key(), "ada.txt")
            .await
            .unwrap();

        let mine = manager
            .vector_search("User: what is my bank password", &key(), "ada.txt")
            .await;
        assert!(mine.contains(&"User: my bank password is hunter2".to_string()));
        assert!(mine.contains(&"Ada kept notes about her bank and the engine.".to_string()));

        let theirs = manager
            .vector_search("User: what is my bank password", &other, "ada.txt")
            .await;
        assert_eq!(theirs, vec!["Ada kept notes about her bank and the engine."]);
    }

    #[tokio::test]
    async fn test_index_failure_keeps_buffer_write() {
        let (manager, db) = manager_with_index(Arc::new(FailingIndex));

        let result = manager
            .write_to_history(Turn::user("User: hello"), &key(), "ada.txt")
            .await;
        assert!(matches!(result, Err(ChatError::StoreUnavailable(_))));
        assert_eq!(db.all_turns(&key()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_degrades_to_empty() {
        let (empty, _) = manager_with_index(Arc::new(LocalIndex::new()));
        assert!(empty.vector_search("anything", &key(), "ada.txt").await.is_empty());

        let (failing, _) = manager_with_index(Arc::new(FailingIndex));
        assert!(failing.vector_search("anything", &key(), "ada.txt").await.is_empty());

        let db = CompanionDb::in_memory().unwrap();
        let unconfigured = MemoryManager::new(Arc::new(db), None, None, config());
        assert!(!unconfigured.long_term_enabled());
        assert!(unconfigured.vector_search("anything", &key(), "ada.txt").await.is_empty());

        let db = CompanionDb::in_memory().unwrap();
        let mut cfg = config();
        cfg.vector_top_k = 0;
        let index = Arc::new(LocalIndex::new());
        let zero_k = MemoryManager::new(Arc::new(db), Some(index), Some(Arc::new(KeywordEmbedder)), cfg);
        zero_k.index_document("ada.txt", "engines everywhere").await.unwrap();
        assert!(zero_k.vector_search("engines", &key(), "ada.txt").await.is_empty());
    }

    #[tokio::test]
    async fn test_index_document() {
        let (manager, _db) = manager_with_index(Arc::new(LocalIndex::new()));
        let count = manager
            .index_document("ada.txt", "Ada studied mathematics.\n\nAda wrote about engines.")
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(manager.vector_search("engines", &key(), "ada.txt").await.len(), 1);
        assert!(manager.vector_search("engines", &key(), "other.txt").await.is_empty());

        let db = CompanionDb::in_memory().unwrap();
        let unconfigured = MemoryManager::new(Arc::new(db), None, None, config());
        assert!(unconfigured.index_document("ada.txt", "text").await.is_err());
    }

    #[test]
    fn test_chunk_text() {
        let text = "one one\n\ntwo two\n\nthree three";
        assert_eq!(chunk_text(text, 100), vec!["one one\n\ntwo two\n\nthree three"]);
        assert_eq!(chunk_text(text, 16), vec!["one one\n\ntwo two", "three three"]);
        assert_eq!(chunk_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert!(chunk_text("\n\n  \n\n", 10).is_empty());
    }
}

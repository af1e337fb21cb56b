//! ============================================================================
//! Memory Module - Recent history and long-term recall for personas
//! ============================================================================
//! Two tiers sit behind one manager:
//! - A recent buffer per conversation key (append-only, bounded reads)
//! - A long-term similarity index partitioned per persona
//!
//! ## Architecture
//! ```text
//! write_to_history(line) → Recent Buffer (redb)
//!                               ↓
//!                         Embed → Long-term Index (Qdrant / local)
//!
//! vector_search(query) → Embed → Top-K passages in persona partition,
//!                        limited to shared documents and this conversation
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use companion_core::memory::{LocalIndex, MemoryManager};
//!
//! let manager = MemoryManager::new(Arc::new(db), Some(Arc::new(LocalIndex::new())), Some(embedder), config.memory);
//! manager.write_to_history(Turn::user("User: hello"), &key, "ada.txt").await?;
//! let recall = manager.vector_search("hello", &key, "ada.txt").await;
//! ```
//! ============================================================================

mod embeddings;
mod history;
mod local;
mod manager;
mod store;
mod types;

pub use embeddings::{
    create_embedding_service, Embedder, EmbeddingProvider, EmbeddingService, DEFAULT_EMBEDDING_MODEL,
    EMBEDDING_DIM,
};
pub use history::HistoryStore;
pub use local::LocalIndex;
pub use manager::MemoryManager;
pub use store::{QdrantIndex, VectorIndex, COLLECTION_NAME};
pub use types::{MemoryRecord, ScoredPassage};

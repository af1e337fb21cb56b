//! ============================================================================
//! COMPANION-CORE: Persona chat with memory
//! ============================================================================
//! This crate handles all backend logic for the companion service:
//! - Recent conversation history in redb, recall through Qdrant
//! - Fixed-window rate limiting per caller
//! - Bounded prompt assembly and streamed generation
//! - The axum HTTP surface
//! ============================================================================

pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod memory;
pub mod orchestrator;
pub mod persona;
pub mod prompt;
pub mod ratelimit;
pub mod server;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use types::*;
pub use config::CompanionConfig;
pub use db::CompanionDb;
pub use error::ChatError;
pub use memory::MemoryManager;
pub use orchestrator::{ChatOrchestrator, ChatRequest, ChatStream};
pub use ratelimit::RateLimiter;

//! ============================================================================
//! Persona Store - Read-side contract for persona records
//! ============================================================================
//! The chat pipeline only reads a persona and appends transcript turns to it;
//! `put` and `list` exist for the admin CLI. `CompanionDb` implements this
//! against redb.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Persona, Turn};

#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// Look up a persona by id
    async fn get(&self, persona_id: &str) -> Result<Option<Persona>>;

    /// Record a turn on the persona's transcript; fails if the persona is gone
    async fn append_turn(&self, persona_id: &str, user_id: &str, turn: Turn) -> Result<Persona>;

    /// Insert or replace a persona record
    async fn put(&self, persona: Persona) -> Result<()>;

    async fn list(&self) -> Result<Vec<Persona>>;
}

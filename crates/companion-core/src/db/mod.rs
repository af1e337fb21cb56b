// ============================================================================
// CompanionDb - Embedded Database (redb)
// ============================================================================
// Persistent local storage for recent conversation history and personas.
// Default path: ~/.companion/companion.redb (override via COMPANION_DB_PATH)
// ============================================================================

pub mod types;

pub use types::{ConversationSummary, DbStats};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::memory::HistoryStore;
use crate::persona::PersonaStore;
use crate::types::{ConversationKey, Persona, PersonaMessage, Turn};

/// Rows keyed by (owner, sequence number)
type RowTable = TableDefinition<'static, (&'static str, u64), &'static [u8]>;

// Table definitions
const HISTORY: RowTable = TableDefinition::new("history");
const PERSONAS: TableDefinition<&str, &[u8]> = TableDefinition::new("personas");
const PERSONA_MESSAGES: RowTable = TableDefinition::new("persona_messages");

/// Embedded database for recent history and personas.
/// Cheap to clone; clones share the same underlying database.
#[derive(Clone)]
pub struct CompanionDb {
    db: Arc<Database>,
    path: Option<PathBuf>,
}

impl CompanionDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses COMPANION_DB_PATH env var or ~/.companion/companion.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("COMPANION_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let dir = home.join(".companion");
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow!("Failed to create .companion directory: {}", e))?;
            dir.join("companion.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        Self::init(db, Some(db_path))
    }

    /// Open a throwaway database held entirely in memory
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?;

        Self::init(db, None)
    }

    fn init(db: Database, path: Option<PathBuf>) -> Result<Self> {
        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(HISTORY).map_err(|e| anyhow!("Failed to create history table: {}", e))?;
            let _ = write_txn.open_table(PERSONAS).map_err(|e| anyhow!("Failed to create personas table: {}", e))?;
            let _ = write_txn.open_table(PERSONA_MESSAGES).map_err(|e| anyhow!("Failed to create persona_messages table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        debug!("Database ready");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Database file path (None for in-memory databases)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ========================================================================
    // History Operations
    // ========================================================================

    /// Append a turn to a conversation, returning the sequence number it got.
    /// redb serializes write transactions, so sequence allocation is atomic.
    pub fn append_turn(&self, key: &ConversationKey, turn: &Turn) -> Result<u64> {
        append_row(&self.db, HISTORY, &key.scope(), turn, "turn")
    }

    /// Read up to `limit` newest turns of a conversation, oldest first
    pub fn recent_turns(&self, key: &ConversationKey, limit: usize) -> Result<Vec<Turn>> {
        read_rows(&self.db, HISTORY, &key.scope(), Some(limit), "turn")
    }

    /// Read every turn of a conversation, oldest first
    pub fn all_turns(&self, key: &ConversationKey) -> Result<Vec<Turn>> {
        read_rows(&self.db, HISTORY, &key.scope(), None, "turn")
    }

    /// List conversations with their turn counts
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(HISTORY)
            .map_err(|e| anyhow!("Failed to open history table: {}", e))?;

        let mut counts: Vec<(String, usize)> = Vec::new();
        let iter = table.range::<(&str, u64)>(..)
            .map_err(|e| anyhow!("Failed to iterate history: {}", e))?;
        for entry in iter {
            let (key, _value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let (scope, _seq) = key.value();
            match counts.last_mut() {
                Some((last, turns)) if last.as_str() == scope => *turns += 1,
                _ => counts.push((scope.to_string(), 1)),
            }
        }

        let results = counts
            .into_iter()
            .filter_map(|(scope, turns)| {
                let key = ConversationKey::from_scope(&scope);
                if key.is_none() {
                    warn!("Skipping history rows with malformed scope {:?}", scope);
                }
                key.map(|key| ConversationSummary { key, turns })
            })
            .collect();
        Ok(results)
    }

    // ========================================================================
    // Persona Operations
    // ========================================================================

    pub fn store_persona(&self, persona: &Persona) -> Result<()> {
        let value = bincode::serialize(persona)
            .map_err(|e| anyhow!("Failed to serialize persona: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(PERSONAS)
                .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;
            table.insert(persona.id.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert persona: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored persona: {}", persona.id);
        Ok(())
    }

    pub fn get_persona(&self, persona_id: &str) -> Result<Option<Persona>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(PERSONAS)
            .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;

        match table.get(persona_id).map_err(|e| anyhow!("Failed to get persona: {}", e))? {
            Some(value) => {
                let persona: Persona = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize persona: {}", e))?;
                Ok(Some(persona))
            }
            None => Ok(None),
        }
    }

    pub fn list_personas(&self) -> Result<Vec<Persona>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(PERSONAS)
            .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate personas: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let persona: Persona = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize persona: {}", e))?;
            results.push(persona);
        }
        Ok(results)
    }

    /// Append a transcript message to an existing persona
    pub fn append_persona_message(&self, persona_id: &str, message: &PersonaMessage) -> Result<Persona> {
        let persona = self
            .get_persona(persona_id)?
            .ok_or_else(|| anyhow!("Persona not found: {}", persona_id))?;

        append_row(&self.db, PERSONA_MESSAGES, persona_id, message, "persona message")?;
        Ok(persona)
    }

    pub fn persona_messages(&self, persona_id: &str) -> Result<Vec<PersonaMessage>> {
        read_rows(&self.db, PERSONA_MESSAGES, persona_id, None, "persona message")
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let conversations = self.list_conversations()?;
        let personas = self.list_personas()?;

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(PERSONA_MESSAGES)
            .map_err(|e| anyhow!("Failed to open persona_messages table: {}", e))?;
        let message_count = table.range::<(&str, u64)>(..)
            .map_err(|e| anyhow!("Failed to iterate persona messages: {}", e))?
            .count();

        Ok(DbStats {
            total_conversations: conversations.len(),
            total_turns: conversations.iter().map(|c| c.turns).sum(),
            total_personas: personas.len(),
            total_persona_messages: message_count,
        })
    }
}

// ============================================================================
// Sequenced row helpers
// ============================================================================
// Rows live under (owner, seq). The owner component compares as a whole, so a
// range over one owner never reaches rows of an owner it is a prefix of.

fn append_row<T: serde::Serialize>(
    db: &Database,
    table_def: RowTable,
    prefix: &str,
    row: &T,
    what: &str,
) -> Result<u64> {
    let value = bincode::serialize(row)
        .map_err(|e| anyhow!("Failed to serialize {}: {}", what, e))?;

    let write_txn = db.begin_write()
        .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
    let seq;
    {
        let mut table = write_txn.open_table(table_def)
            .map_err(|e| anyhow!("Failed to open table: {}", e))?;

        let last_seq = {
            let mut range = table.range((prefix, 0u64)..=(prefix, u64::MAX))
                .map_err(|e| anyhow!("Failed to scan {} rows: {}", what, e))?;
            match range.next_back() {
                Some(entry) => {
                    let (key, _) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
                    Some(key.value().1)
                }
                None => None,
            }
        };
        seq = last_seq.map(|s| s + 1).unwrap_or(0);

        table.insert((prefix, seq), value.as_slice())
            .map_err(|e| anyhow!("Failed to insert {}: {}", what, e))?;
    }
    write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

    debug!("Appended {} {} under {}", what, seq, prefix);
    Ok(seq)
}

fn read_rows<T: serde::de::DeserializeOwned>(
    db: &Database,
    table_def: RowTable,
    prefix: &str,
    limit: Option<usize>,
    what: &str,
) -> Result<Vec<T>> {
    let read_txn = db.begin_read()
        .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
    let table = read_txn.open_table(table_def)
        .map_err(|e| anyhow!("Failed to open table: {}", e))?;

    let range = table.range((prefix, 0u64)..=(prefix, u64::MAX))
        .map_err(|e| anyhow!("Failed to scan {} rows: {}", what, e))?;

    // Walk newest-first so the limit keeps the tail, then restore write order
    let mut results = Vec::new();
    for entry in range.rev().take(limit.unwrap_or(usize::MAX)) {
        let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
        let row: T = bincode::deserialize(value.value())
            .map_err(|e| anyhow!("Failed to deserialize {}: {}", what, e))?;
        results.push(row);
    }
    results.reverse();
    Ok(results)
}

// ============================================================================
// Store trait implementations
// ============================================================================
// redb calls block, so they run on the blocking pool.

#[async_trait]
impl HistoryStore for CompanionDb {
    async fn append(&self, key: &ConversationKey, turn: Turn) -> Result<()> {
        let db = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.append_turn(&key, &turn))
            .await
            .map_err(|e| anyhow!("History append task failed: {}", e))??;
        Ok(())
    }

    async fn read_recent(&self, key: &ConversationKey, limit: usize) -> Result<Vec<Turn>> {
        let db = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.recent_turns(&key, limit))
            .await
            .map_err(|e| anyhow!("History read task failed: {}", e))?
    }
}

#[async_trait]
impl PersonaStore for CompanionDb {
    async fn get(&self, persona_id: &str) -> Result<Option<Persona>> {
        let db = self.clone();
        let persona_id = persona_id.to_string();
        tokio::task::spawn_blocking(move || db.get_persona(&persona_id))
            .await
            .map_err(|e| anyhow!("Persona read task failed: {}", e))?
    }

    async fn append_turn(&self, persona_id: &str, user_id: &str, turn: Turn) -> Result<Persona> {
        let db = self.clone();
        let persona_id = persona_id.to_string();
        let message = PersonaMessage {
            user_id: user_id.to_string(),
            turn,
        };
        tokio::task::spawn_blocking(move || db.append_persona_message(&persona_id, &message))
            .await
            .map_err(|e| anyhow!("Persona append task failed: {}", e))?
    }

    async fn put(&self, persona: Persona) -> Result<()> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.store_persona(&persona))
            .await
            .map_err(|e| anyhow!("Persona write task failed: {}", e))?
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.list_personas())
            .await
            .map_err(|e| anyhow!("Persona list task failed: {}", e))?
    }
}

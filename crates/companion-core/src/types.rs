//! ============================================================================
//! Core Types for the Companion backend
//! ============================================================================
//! Conversation keys, turns, and persona records shared by every component.
//! Turns and personas are bincode-encoded into redb and JSON-encoded for the
//! admin CLI.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Identifies one isolated memory namespace: a persona talking to a user
/// through a particular model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub persona_id: String,
    pub user_id: String,
    pub model_name: String,
}

impl ConversationKey {
    pub fn new(
        persona_id: impl Into<String>,
        user_id: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            persona_id: persona_id.into(),
            user_id: user_id.into(),
            model_name: model_name.into(),
        }
    }

    /// Human-readable form for logs and the admin CLI. Not unique: ids may
    /// themselves contain '-'.
    pub fn render(&self) -> String {
        format!("{}-{}-{}", self.persona_id, self.model_name, self.user_id)
    }

    /// Collision-free form used for storage rows, index payloads and locks.
    /// Every component is length-prefixed, so ids may contain any character.
    pub fn scope(&self) -> String {
        [&self.persona_id, &self.model_name, &self.user_id]
            .iter()
            .map(|part| format!("{}:{}", part.len(), part))
            .collect()
    }

    /// Inverse of [`ConversationKey::scope`]
    pub fn from_scope(scope: &str) -> Option<Self> {
        let mut rest = scope;
        let mut parts = Vec::with_capacity(3);
        for _ in 0..3 {
            let (len, tail) = rest.split_once(':')?;
            let len: usize = len.parse().ok()?;
            parts.push(tail.get(..len)?.to_string());
            rest = &tail[len..];
        }
        if !rest.is_empty() {
            return None;
        }

        let user_id = parts.pop()?;
        let model_name = parts.pop()?;
        let persona_id = parts.pop()?;
        Some(Self::new(persona_id, user_id, model_name))
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Who wrote a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    /// Persona background written once when a conversation starts
    Seed,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Seed => "seed",
        };
        f.write_str(name)
    }
}

/// A single immutable line of conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Unix timestamp (milliseconds)
    pub written_at: i64,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            written_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn seed(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Seed, content)
    }
}

/// Persona record as exposed by the persona store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub instructions: String,
    /// Opening text written into an empty conversation
    pub seed: String,
    pub category_id: String,
}

impl Persona {
    /// Long-term memory partition holding this persona's background passages
    pub fn source_file_id(&self) -> String {
        source_file_id(&self.id)
    }
}

/// Partition name for a persona id
pub fn source_file_id(persona_id: &str) -> String {
    format!("{}.txt", persona_id)
}

/// Transcript entry attached to a persona, tagged with the user it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaMessage {
    pub user_id: String,
    pub turn: Turn,
}

//! Test doubles shared by the crate's unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::db::CompanionDb;
use crate::inference::{GenerationOptions, InferenceClient, TextStream};
use crate::memory::{Embedder, HistoryStore, MemoryRecord, ScoredPassage, VectorIndex};
use crate::persona::PersonaStore;
use crate::types::{ConversationKey, Persona, Turn};

const KEYWORD_DIM: usize = 64;

/// Bag-of-words embedder: shared words give positive similarity
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; KEYWORD_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % KEYWORD_DIM] += 1.0;
        }
        Ok(vector)
    }
}

/// Index whose backend is always down
pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(&self, _record: &MemoryRecord) -> Result<()> {
        Err(anyhow!("index unreachable"))
    }

    async fn query(
        &self,
        _source_file_id: &str,
        _conversation: Option<&str>,
        _embedding: Vec<f32>,
        _top_k: u64,
    ) -> Result<Vec<ScoredPassage>> {
        Err(anyhow!("index unreachable"))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

/// What the scripted model does when asked to generate
#[derive(Debug, Clone)]
pub enum Script {
    Chunks(Vec<String>),
    /// Emit the chunks, then fail
    FailAfter(Vec<String>, String),
    /// Fail before the stream starts
    Refuse(String),
    /// Never produce anything
    Hang,
}

pub struct ScriptedInference {
    script: Script,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn generate_streaming(&self, prompt: &str, _options: &GenerationOptions) -> Result<TextStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        match &self.script {
            Script::Chunks(chunks) => {
                let items: Vec<Result<String>> = chunks.iter().cloned().map(Ok).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Script::FailAfter(chunks, message) => {
                let mut items: Vec<Result<String>> = chunks.iter().cloned().map(Ok).collect();
                items.push(Err(anyhow!(message.clone())));
                Ok(Box::pin(stream::iter(items)))
            }
            Script::Refuse(message) => Err(anyhow!(message.clone())),
            Script::Hang => Ok(Box::pin(stream::pending::<Result<String>>())),
        }
    }
}

/// redb store that counts every call made through the store traits
pub struct CountingStore {
    pub db: CompanionDb,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(db: CompanionDb) -> Self {
        Self {
            db,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistoryStore for CountingStore {
    async fn append(&self, key: &ConversationKey, turn: Turn) -> Result<()> {
        self.hit();
        HistoryStore::append(&self.db, key, turn).await
    }

    async fn read_recent(&self, key: &ConversationKey, limit: usize) -> Result<Vec<Turn>> {
        self.hit();
        self.db.read_recent(key, limit).await
    }
}

#[async_trait]
impl PersonaStore for CountingStore {
    async fn get(&self, persona_id: &str) -> Result<Option<Persona>> {
        self.hit();
        PersonaStore::get(&self.db, persona_id).await
    }

    async fn append_turn(&self, persona_id: &str, user_id: &str, turn: Turn) -> Result<Persona> {
        self.hit();
        PersonaStore::append_turn(&self.db, persona_id, user_id, turn).await
    }

    async fn put(&self, persona: Persona) -> Result<()> {
        self.hit();
        PersonaStore::put(&self.db, persona).await
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        self.hit();
        PersonaStore::list(&self.db).await
    }
}

pub fn ada() -> Persona {
    Persona {
        id: "ada".to_string(),
        name: "Ada".to_string(),
        instructions: "You are Ada Lovelace, mathematician and writer.".to_string(),
        seed: "Ada: Good day to you.\n\nUser: Hello Ada.\n\nAda: What shall we discuss?".to_string(),
        category_id: "scientists".to_string(),
    }
}

/// Number of seed lines in `ada()`
pub const ADA_SEED_LINES: usize = 3;

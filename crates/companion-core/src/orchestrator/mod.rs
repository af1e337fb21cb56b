//! ============================================================================
//! Chat Orchestrator - One persona turn, end to end
//! ============================================================================
//! admit → load persona → read/seed history → persist user turn → recall →
//! build prompt → stream generation → post-process → persist reply
//!
//! Everything up to the prompt happens before `chat` returns, so those
//! failures come back as a plain `Err`. Generation runs in a spawned task
//! that owns the conversation lock; its output reaches the caller through a
//! channel, and a failure there arrives as the stream's last item. The task
//! finishes and persists even if the caller stops listening.
//! ============================================================================

mod locks;
mod reply;

pub use locks::KeyLocks;
pub use reply::ReplyFilter;

use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::inference::{GenerationOptions, InferenceClient};
use crate::memory::MemoryManager;
use crate::persona::PersonaStore;
use crate::prompt;
use crate::ratelimit::RateLimiter;
use crate::types::{ConversationKey, Persona, Turn};

/// Reply chunks in order; an `Err` item is terminal
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

const STREAM_BUFFER: usize = 32;

/// One caller turn
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub persona_id: String,
    pub user_id: String,
    pub prompt: String,
    /// Rate-limit identity, e.g. request path plus user id
    pub identity: String,
}

pub struct ChatOrchestrator {
    limiter: Arc<RateLimiter>,
    personas: Arc<dyn PersonaStore>,
    memory: Arc<MemoryManager>,
    inference: Arc<dyn InferenceClient>,
    locks: KeyLocks,
    config: ChatConfig,
    model_name: String,
}

/// Everything the generation task needs once `chat` has returned
struct Generation {
    personas: Arc<dyn PersonaStore>,
    memory: Arc<MemoryManager>,
    inference: Arc<dyn InferenceClient>,
    config: ChatConfig,
    persona: Persona,
    key: ConversationKey,
    prompt: String,
}

impl ChatOrchestrator {
    pub fn new(
        limiter: Arc<RateLimiter>,
        personas: Arc<dyn PersonaStore>,
        memory: Arc<MemoryManager>,
        inference: Arc<dyn InferenceClient>,
        config: ChatConfig,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            limiter,
            personas,
            memory,
            inference,
            locks: KeyLocks::new(),
            config,
            model_name: model_name.into(),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Run one turn. Returns once the prompt is built and generation has
    /// been started; the reply streams through the returned `ChatStream`.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatStream, ChatError> {
        if request.user_id.trim().is_empty() {
            return Err(ChatError::Unauthenticated);
        }
        if request.persona_id.trim().is_empty() {
            return Err(ChatError::Validation("persona id is required".to_string()));
        }
        if request.prompt.trim().is_empty() {
            return Err(ChatError::Validation("prompt is required".to_string()));
        }

        if !self.limiter.admit(&request.identity).await? {
            return Err(ChatError::RateLimited);
        }

        let persona = self
            .personas
            .get(&request.persona_id)
            .await
            .map_err(ChatError::store)?
            .ok_or_else(|| ChatError::NotFound(format!("persona {}", request.persona_id)))?;

        let key = ConversationKey::new(&persona.id, &request.user_id, &self.model_name);
        let guard = self.locks.acquire(&key.scope()).await;
        debug!("Admitted turn for {}", key);

        let prompt = self.prepare(&persona, &key, &request).await?;

        let generation = Generation {
            personas: self.personas.clone(),
            memory: self.memory.clone(),
            inference: self.inference.clone(),
            config: self.config.clone(),
            persona,
            key,
            prompt,
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(generation.run(guard, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Seed if needed, persist the user turn, recall and build the prompt
    async fn prepare(
        &self,
        persona: &Persona,
        key: &ConversationKey,
        request: &ChatRequest,
    ) -> Result<String, ChatError> {
        let source_file_id = persona.source_file_id();

        let history = self.memory.read_latest_history(key).await?;
        if history.is_empty() {
            let seeded = self
                .memory
                .seed_chat_history(&persona.seed, &self.config.seed_delimiter, key)
                .await?;
            info!("Seeded {} with {} lines", key, seeded);
        }

        let user_line = format!("User: {}", request.prompt.trim());
        self.memory
            .write_to_history(Turn::user(user_line), key, &source_file_id)
            .await?;
        self.personas
            .append_turn(&persona.id, &request.user_id, Turn::user(request.prompt.trim()))
            .await
            .map_err(ChatError::store)?;

        let recent = self.memory.read_latest_history(key).await?;
        let relevant = self
            .memory
            .vector_search(&recent.join("\n"), key, &source_file_id)
            .await;
        debug!("Recalled {} passages for {}", relevant.len(), key);

        Ok(prompt::assemble(
            &persona.instructions,
            &relevant,
            &recent,
            &persona.name,
            self.config.prompt_char_budget,
        ))
    }
}

impl Generation {
    async fn run(self, _guard: OwnedMutexGuard<()>, tx: mpsc::Sender<Result<String, ChatError>>) {
        let reply = match self.generate(&tx).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Generation failed for {}: {}", self.key, e);
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        if reply.chars().count() <= self.config.min_reply_chars {
            warn!("Discarding trivial reply for {}: {:?}", self.key, reply);
            return;
        }

        if let Err(e) = self.persist(&reply).await {
            error!("Failed to persist reply for {}: {}", self.key, e);
            let _ = tx.send(Err(e)).await;
            return;
        }
        debug!("Turn complete for {}", self.key);
    }

    /// Stream filtered chunks to `tx` and return the full reply
    async fn generate(&self, tx: &mpsc::Sender<Result<String, ChatError>>) -> Result<String, ChatError> {
        let timeout = self.config.inference_timeout();
        let deadline = Instant::now() + timeout;
        let options = GenerationOptions {
            max_length: self.config.max_output_length,
        };
        let timed_out = || ChatError::InferenceFailure(format!("timed out after {:?}", timeout));

        let mut stream = timeout_at(deadline, self.inference.generate_streaming(&self.prompt, &options))
            .await
            .map_err(|_| timed_out())?
            .map_err(ChatError::inference)?;

        let mut filter = ReplyFilter::new(&self.config);
        while !filter.is_done() {
            let chunk = match timeout_at(deadline, stream.next()).await {
                Ok(Some(chunk)) => chunk.map_err(ChatError::inference)?,
                Ok(None) => break,
                Err(_) => return Err(timed_out()),
            };
            if let Some(text) = filter.push(&chunk) {
                // A closed receiver means the caller left; keep going so the reply is stored
                let _ = tx.send(Ok(text)).await;
            }
        }

        Ok(filter.finish())
    }

    async fn persist(&self, reply: &str) -> Result<(), ChatError> {
        let line = format!("{}: {}", self.persona.name, reply);
        self.memory
            .write_to_history(Turn::assistant(line), &self.key, &self.persona.source_file_id())
            .await?;
        self.personas
            .append_turn(&self.persona.id, &self.key.user_id, Turn::assistant(reply))
            .await
            .map_err(ChatError::store)?;
        Ok(())
    }
}

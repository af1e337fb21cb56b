//! ============================================================================
//! Configuration - Environment-driven settings for the companion backend
//! ============================================================================
//! `CompanionConfig::default()` reads the environment (call `dotenvy::dotenv()`
//! first to pick up a `.env` file). Every tunable has a built-in default.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default model tag used in conversation keys and inference requests
pub const DEFAULT_MODEL_NAME: &str = "llama2-13b";

/// Default OpenAI-compatible inference endpoint
pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://api.x.ai/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    pub host: String,
    pub port: u16,
    /// redb file path (None = ~/.companion/companion.redb)
    pub db_path: Option<String>,
    /// Qdrant URL; long-term memory is disabled when unset
    pub qdrant_url: Option<String>,
    pub xai_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Embedding model override (default: the provider's small model)
    pub embedding_model: Option<String>,
    /// Embedding endpoint override for self-hosted OpenAI-compatible servers
    pub embedding_base_url: Option<String>,
    pub inference_base_url: String,
    pub inference_model: String,
    pub model_name: String,
    pub memory: MemoryConfig,
    pub rate_limit: RateLimitConfig,
    pub chat: ChatConfig,
}

/// Recent-history window and retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub history_window_entries: usize,
    pub history_window_chars: usize,
    pub vector_top_k: u64,
    /// Passage size used when ingesting persona documents
    pub ingest_chunk_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_window_entries: env_or("COMPANION_HISTORY_ENTRIES", 30),
            history_window_chars: env_or("COMPANION_HISTORY_CHARS", 8000),
            vector_top_k: env_or("COMPANION_VECTOR_TOP_K", 3),
            ingest_chunk_chars: env_or("COMPANION_INGEST_CHUNK_CHARS", 1000),
        }
    }
}

/// Fixed-window admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: env_or("COMPANION_RATE_CAPACITY", 10),
            window_secs: env_or("COMPANION_RATE_WINDOW_SECS", 10),
        }
    }
}

/// Orchestrator policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Separator between seed lines in a persona's seed text
    pub seed_delimiter: String,
    /// Prompt size limit in characters
    pub prompt_char_budget: usize,
    /// Maximum output length passed to the inference service
    pub max_output_length: u32,
    pub inference_timeout_secs: u64,
    /// Strip `noise_chars` from model output before it is streamed
    pub strip_noise_chars: bool,
    pub noise_chars: String,
    /// Keep only the first non-empty line of model output
    pub first_line_only: bool,
    /// Replies must be longer than this (in chars) to be persisted
    pub min_reply_chars: usize,
}

impl ChatConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            seed_delimiter: "\n\n".to_string(),
            prompt_char_budget: env_or("COMPANION_PROMPT_BUDGET", 12_000),
            max_output_length: env_or("COMPANION_MAX_OUTPUT_LENGTH", 2048),
            inference_timeout_secs: env_or("COMPANION_INFERENCE_TIMEOUT_SECS", 60),
            strip_noise_chars: env_or("COMPANION_STRIP_NOISE", true),
            noise_chars: ",".to_string(),
            first_line_only: env_or("COMPANION_FIRST_LINE_ONLY", true),
            min_reply_chars: 1,
        }
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("COMPANION_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("COMPANION_PORT", 3000),
            db_path: std::env::var("COMPANION_DB_PATH").ok(),
            qdrant_url: std::env::var("QDRANT_URL").ok(),
            xai_api_key: std::env::var("XAI_API_KEY").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            embedding_model: std::env::var("EMBEDDING_MODEL").ok(),
            embedding_base_url: std::env::var("EMBEDDING_BASE_URL").ok(),
            inference_base_url: std::env::var("INFERENCE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_INFERENCE_BASE_URL.to_string()),
            inference_model: std::env::var("INFERENCE_MODEL")
                .unwrap_or_else(|_| "grok-3-mini".to_string()),
            model_name: std::env::var("COMPANION_MODEL_NAME")
                .unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string()),
            memory: MemoryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl CompanionConfig {
    /// API key for the inference service, x.ai first then OpenAI
    pub fn inference_api_key(&self) -> Option<String> {
        self.xai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| self.openai_api_key.clone().filter(|k| !k.is_empty()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let chat = ChatConfig::default();
        assert_eq!(chat.seed_delimiter, "\n\n");
        assert_eq!(chat.noise_chars, ",");
        assert_eq!(chat.min_reply_chars, 1);
        assert_eq!(chat.inference_timeout(), Duration::from_secs(chat.inference_timeout_secs));
    }

    #[test]
    fn test_env_or_fallback() {
        assert_eq!(env_or("COMPANION_TEST_UNSET_VARIABLE", 42usize), 42);
    }

    #[test]
    fn test_inference_key_preference() {
        let mut config = CompanionConfig::default();
        config.xai_api_key = Some(String::new());
        config.openai_api_key = Some("sk-openai".to_string());
        assert_eq!(config.inference_api_key().as_deref(), Some("sk-openai"));

        config.xai_api_key = Some("xai-key".to_string());
        assert_eq!(config.inference_api_key().as_deref(), Some("xai-key"));
    }
}

//! ============================================================================
//! Embedding Service - Vector embeddings for long-term memory
//! ============================================================================
//! Turns conversation lines and persona passages into vectors through an
//! OpenAI-compatible `/embeddings` endpoint. x.ai is preferred when both keys
//! are configured.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CompanionConfig;

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Vector size produced by the default model; the Qdrant collection uses it
pub const EMBEDDING_DIM: usize = 1536;

/// Turns text into vectors for the long-term index
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Hosted embedding backends with a known base URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Xai,
    OpenAi,
}

impl EmbeddingProvider {
    pub fn base_url(self) -> &'static str {
        match self {
            EmbeddingProvider::Xai => "https://api.x.ai/v1",
            EmbeddingProvider::OpenAi => "https://api.openai.com/v1",
        }
    }
}

pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl EmbeddingService {
    pub fn new(provider: EmbeddingProvider, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: provider.base_url().to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a self-hosted OpenAI-compatible server
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Embed several texts in one request; output order matches `texts`
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| anyhow!("Embedding request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read embedding response: {}", e))?;

        let vectors = parse_embedding_response(status, &body)?;
        if vectors.len() != texts.len() {
            return Err(anyhow!(
                "Embedding API returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            ));
        }
        Ok(vectors)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| anyhow!("No embedding returned"))
    }
}

/// Decode an `/embeddings` reply into vectors ordered by input index
fn parse_embedding_response(status: StatusCode, body: &str) -> Result<Vec<Vec<f32>>> {
    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());
        return Err(anyhow!("Embedding API error ({}): {}", status, message));
    }

    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Malformed embedding response: {}", e))?;

    if let Some(usage) = &response.usage {
        debug!("Embedding used {} tokens", usage.total_tokens);
    }

    let mut rows = response.data;
    rows.sort_by_key(|row| row.index);
    Ok(rows.into_iter().map(|row| row.embedding).collect())
}

/// Pick an embedding backend from the configured keys, x.ai first, then
/// apply any model or endpoint override.
/// Returns None when neither key is set; long-term memory is then disabled.
pub fn create_embedding_service(config: &CompanionConfig) -> Option<EmbeddingService> {
    let xai_key = config.xai_api_key.clone().filter(|k| !k.is_empty());
    let openai_key = config.openai_api_key.clone().filter(|k| !k.is_empty());

    let mut service = if let Some(key) = xai_key {
        debug!("Using x.ai for embeddings");
        EmbeddingService::new(EmbeddingProvider::Xai, key)
    } else if let Some(key) = openai_key {
        warn!("x.ai API key not available, using OpenAI for embeddings");
        EmbeddingService::new(EmbeddingProvider::OpenAi, key)
    } else {
        return None;
    };

    if let Some(model) = config.embedding_model.as_deref().filter(|m| !m.is_empty()) {
        service = service.with_model(model);
    }
    if let Some(url) = config.embedding_base_url.as_deref().filter(|u| !u.is_empty()) {
        service = service.with_base_url(url);
    }
    Some(service)
}

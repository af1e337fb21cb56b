//! ============================================================================
//! HTTP Surface - axum routes for chat and health
//! ============================================================================
//! `POST /chat/{persona_id}` with `{"prompt": "..."}` streams the reply as
//! `text/plain`. The caller's identity arrives in the `x-user-id` header,
//! set by whatever authenticates requests upstream.
//! ============================================================================

use anyhow::{anyhow, bail, Result};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CompanionConfig;
use crate::db::CompanionDb;
use crate::error::ChatError;
use crate::inference::ChatCompletionsClient;
use crate::memory::MemoryManager;
use crate::orchestrator::{ChatOrchestrator, ChatRequest};
use crate::ratelimit::{InMemoryCounterStore, RateLimiter};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
}

impl AppState {
    /// Wire up every component from configuration
    pub async fn from_config(config: &CompanionConfig, db: CompanionDb) -> Result<Self> {
        let Some(api_key) = config.inference_api_key() else {
            bail!("No inference API key set (XAI_API_KEY or OPENAI_API_KEY)");
        };

        let db = Arc::new(db);
        let memory = Arc::new(MemoryManager::connect(config, db.clone()).await?);
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            config.rate_limit.clone(),
        ));
        let inference = Arc::new(ChatCompletionsClient::new(
            api_key,
            &config.inference_base_url,
            &config.inference_model,
        ));

        let orchestrator = ChatOrchestrator::new(
            limiter,
            db,
            memory,
            inference,
            config.chat.clone(),
            config.model_name.clone(),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    prompt: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(missing_persona))
        .route("/chat/", post(missing_persona))
        .route("/chat/{persona_id}", post(chat))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;

    info!("Companion server listening on {}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow!("Server error: {}", e))
}

async fn health(State(state): State<AppState>) -> Response {
    let memory = state.orchestrator.memory();
    let index_healthy = memory.health_check().await;
    let status = if index_healthy { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "long_term_memory": memory.long_term_enabled(),
        "index_healthy": index_healthy,
    }))
    .into_response()
}

async fn missing_persona() -> Response {
    error_response(ChatError::Validation("persona id is required".to_string()))
}

async fn chat(
    State(state): State<AppState>,
    Path(persona_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if user_id.is_empty() {
        return error_response(ChatError::Unauthenticated);
    }

    let body: ChatBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => return error_response(ChatError::Validation(format!("invalid body: {}", e))),
    };

    let request = ChatRequest {
        identity: format!("{}-{}", uri.path(), user_id),
        persona_id,
        user_id,
        prompt: body.prompt,
    };

    let mut reply = match state.orchestrator.chat(request).await {
        Ok(reply) => reply,
        Err(e) => return error_response(e),
    };

    // Hold the status line until the first chunk so early failures get a real status
    let first = match reply.next().await {
        Some(Err(e)) => return error_response(e),
        first => first,
    };

    let body = Body::from_stream(stream::iter(first).chain(reply));
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn error_response(err: ChatError) -> Response {
    let status = err.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Chat request failed: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

//! ============================================================================
//! Chat Errors - Failure taxonomy surfaced to callers
//! ============================================================================
//! Backend adapters report `anyhow::Error`; the memory manager and orchestrator
//! fold those into one of these variants. Each variant maps to one HTTP status.
//! ============================================================================

use axum::http::StatusCode;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Inference failed: {0}")]
    InferenceFailure(String),
}

impl ChatError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }

    pub fn inference(err: impl std::fmt::Display) -> Self {
        ChatError::InferenceFailure(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::StoreUnavailable(_) | ChatError::InferenceFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

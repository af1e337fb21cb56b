//! ============================================================================
//! Inference Client - Streamed text generation
//! ============================================================================
//! Talks to an OpenAI-compatible `/chat/completions` endpoint with
//! `stream: true` and yields the content deltas as they arrive.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

/// Lazily produced text chunks; an `Err` item ends generation
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens
    pub max_length: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { max_length: 2048 }
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Start generating from `prompt`. Errors before the first byte are
    /// returned directly; errors mid-stream arrive as stream items.
    async fn generate_streaming(&self, prompt: &str, options: &GenerationOptions)
        -> Result<TextStream>;
}

/// Client for OpenAI-compatible chat completion APIs (x.ai, OpenAI, local servers)
pub struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl ChatCompletionsClient {
    pub fn new(api_key: String, base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl InferenceClient for ChatCompletionsClient {
    async fn generate_streaming(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TextStream> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            "Requesting completion from {} ({} prompt chars, max {} tokens)",
            self.model,
            prompt.chars().count(),
            options.max_length
        );

        let request = CompletionRequest {
            model: &self.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: options.max_length,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send completion request: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                return Err(anyhow!(
                    "Completion API error ({}): {}",
                    status,
                    error_response.error.message
                ));
            }
            return Err(anyhow!("Completion API error ({}): {}", status, error_text));
        }

        Ok(parse_sse_stream(response))
    }
}

/// Turn an SSE response body into content deltas, stopping at `[DONE]`
fn parse_sse_stream(response: reqwest::Response) -> TextStream {
    let events = response
        .bytes_stream()
        .eventsource()
        .take_while(|event| {
            let done = matches!(event, Ok(e) if e.data.trim() == "[DONE]");
            futures_util::future::ready(!done)
        });

    let deltas = events.filter_map(|event| async move {
        match event {
            Ok(event) => parse_delta(&event.data).transpose(),
            Err(e) => Some(Err(anyhow!("Completion stream error: {}", e))),
        }
    });

    Box::pin(deltas)
}

/// Extract the content delta from one SSE data payload.
/// Returns `Ok(None)` for keep-alives and role-only deltas.
fn parse_delta(data: &str) -> Result<Option<String>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let parsed: StreamResponse = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(data) {
                return Err(anyhow!("Completion stream error: {}", error_response.error.message));
            }
            return Err(anyhow!("Malformed completion chunk: {}", e));
        }
    };

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_content() {
        let data = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_delta(data).unwrap(), Some("Hello".to_string()));
    }

    #[test]
    fn test_parse_delta_skips_role_and_keepalive() {
        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta(role_only).unwrap(), None);
        assert_eq!(parse_delta("").unwrap(), None);
        assert_eq!(parse_delta(r#"{"choices":[]}"#).unwrap(), None);
    }

    #[test]
    fn test_parse_delta_surfaces_api_error() {
        let data = r#"{"error":{"message":"overloaded"}}"#;
        let err = parse_delta(data).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_parse_delta_rejects_malformed_chunk() {
        let err = parse_delta(r#"{"choices":[{"delta":"#).unwrap_err();
        assert!(err.to_string().contains("Malformed completion chunk"));
        assert!(parse_delta("not json").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest {
            model: "grok-3-mini",
            messages: vec![RequestMessage {
                role: "user",
                content: "Ada:",
            }],
            max_tokens: 2048,
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["messages"][0]["content"], "Ada:");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ChatCompletionsClient::new("key".into(), "http://localhost:8080/v1/", "m");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.model(), "m");
    }
}

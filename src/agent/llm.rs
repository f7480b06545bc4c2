//! Text generation backend
//!
//! The agent only needs "messages in, text out". Production talks to any
//! OpenAI-compatible chat completions endpoint over `reqwest`; tests mock
//! the [`TextGenerator`] trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::error::AppError;
use crate::metrics::GENERATION_DURATION_SECONDS;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Text-generation collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate the next assistant message.
    ///
    /// # Errors
    /// Returns `ExternalService` on transport failures, non-success
    /// responses, malformed bodies and empty content
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError>;
}

/// OpenAI-compatible chat completions client
///
/// Works with DeepSeek, OpenAI and Ollama endpoints.
/// Sends requests to `{api_url}/chat/completions`.
pub struct OpenAiCompatible {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatible {
    /// Create a client with the configured per-request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &AgentConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn send(&self, request: &CompletionRequest) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.api_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": false
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ExternalService("text generation timed out".to_string())
                } else {
                    AppError::ExternalService(format!("text generation request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(AppError::ExternalService(format!(
                "text generation returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("text generation response parse failed: {e}"))
        })?;

        extract_content(&json)
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatible {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError> {
        let started = Instant::now();
        let result = self.send(&request).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        GENERATION_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        result
    }
}

/// Extract `choices[0].message.content`, rejecting blank text.
fn extract_content(json: &serde_json::Value) -> Result<String, AppError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            AppError::ExternalService("response missing choices[0].message.content".to_owned())
        })?;

    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::ExternalService(
            "text generation returned empty content".to_owned(),
        ));
    }
    Ok(content.to_owned())
}

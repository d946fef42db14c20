//! Text-completion capability
//!
//! The planner and every semantic operation talk to a language model through
//! [`LlmClient`]. Concrete HTTP clients live in `askdb-planners`; this crate only
//! needs the contract.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// LLM request payload
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    /// Per-call temperature override; `None` keeps the client default.
    pub temperature: Option<f32>,
    /// Per-call completion length cap; `None` keeps the client default.
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Request with only a user prompt.
    pub fn user(prompt: impl Into<String>) -> Self {
        Self {
            user: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// LLM errors
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Text-completion capability: prompt in, text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;
}

#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }
}

/// Shorten text for log output.
pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

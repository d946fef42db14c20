use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use askdb_core::completion::{LlmClient, LlmError, LlmRequest};

/// Mock LLM client for tests/examples: always returns the same response.
pub struct MockLlmClient {
    pub response: String,
}

impl MockLlmClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
        Ok(self.response.clone())
    }
}

/// Replays queued responses in order and records every request.
///
/// Running out of responses is reported as [`LlmError::Response`].
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.responses.get_mut().push_back(Ok(response.into()));
        self
    }

    pub fn with_error(mut self, error: LlmError) -> Self {
        self.responses.get_mut().push_back(Err(error));
        self
    }

    /// Requests seen so far.
    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Response("no scripted response left".to_string())))
    }
}

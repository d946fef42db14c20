use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use askdb_core::completion::{LlmClient, LlmError, LlmRequest};

/// How the API key is presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuth {
    /// `Authorization: Bearer <key>` (OpenAI and compatibles)
    Bearer(String),
    /// `api-key: <key>` (Azure OpenAI)
    ApiKeyHeader(String),
    None,
}

/// HTTP client config (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct HttpLlmClientConfig {
    /// Full chat-completions URL
    pub endpoint: String,
    pub auth: ApiAuth,
    /// Sent as `model`; Azure selects the model by deployment instead.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub extra_headers: HeaderMap,
}

impl Default for HttpLlmClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            auth: ApiAuth::None,
            model: Some("gpt-4o-mini".to_string()),
            temperature: None,
            max_tokens: None,
            timeout_secs: 60,
            extra_headers: HeaderMap::new(),
        }
    }
}

impl HttpLlmClientConfig {
    /// OpenAI-compatible API rooted at `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn openai(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            auth: ApiAuth::Bearer(api_key.into()),
            model: Some(model.into()),
            ..Self::default()
        }
    }

    /// Azure OpenAI deployment on the resource at `endpoint`.
    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            auth: ApiAuth::ApiKeyHeader(api_key.into()),
            model: None,
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// HTTP LLM client using an OpenAI-compatible API
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: HttpLlmClientConfig,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmClientConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpLlmClientConfig {
        &self.config
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = self.config.extra_headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match &self.config.auth {
            ApiAuth::Bearer(key) => {
                let value = format!("Bearer {}", key);
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&value).map_err(|e| LlmError::Http(e.to_string()))?,
                );
            }
            ApiAuth::ApiKeyHeader(key) => {
                headers.insert(
                    HeaderName::from_static("api-key"),
                    HeaderValue::from_str(key).map_err(|e| LlmError::Http(e.to_string()))?,
                );
            }
            ApiAuth::None => {}
        }
        Ok(headers)
    }

    fn body(&self, request: LlmRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.user,
        });
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_tokens),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let headers = self.headers()?;
        let body = self.body(request);

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Response(format!("HTTP {}: {}", status, text)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Serialization(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("Missing choices".to_string()))
    }
}

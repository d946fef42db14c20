//! LLM client factory for building clients from configuration.

use std::sync::Arc;

use thiserror::Error;

use askdb_config::{CompletionConfig, CompletionKind, ConfigError};
use askdb_core::completion::{LlmClient, LlmError};

use crate::http::{HttpLlmClient, HttpLlmClientConfig};

/// Errors that can occur when building an LLM client.
#[derive(Debug, Error)]
pub enum LlmBuildError {
    #[error("completion config: {0}")]
    Config(#[from] ConfigError),
    #[error("completion.model is required for kind 'openai'")]
    MissingModel,
    #[error("failed to build http client: {0}")]
    Client(#[from] LlmError),
}

/// Build a completion client from the `completion` config section.
pub fn build_client_from_config(
    config: &CompletionConfig,
) -> Result<Arc<dyn LlmClient>, LlmBuildError> {
    let http_config = http_config_from(config)?;
    tracing::info!(
        kind = ?config.kind,
        endpoint = %http_config.endpoint,
        "completion client configured"
    );
    Ok(Arc::new(HttpLlmClient::new(http_config)?))
}

fn http_config_from(config: &CompletionConfig) -> Result<HttpLlmClientConfig, LlmBuildError> {
    let api_key = config.resolve_api_key()?;
    let endpoint = config.resolve_endpoint()?;
    let http_config = match config.kind {
        CompletionKind::AzureOpenai => {
            let deployment = config.resolve_deployment()?;
            HttpLlmClientConfig::azure(&endpoint, &deployment, &config.api_version, api_key)
        }
        CompletionKind::Openai => {
            let model = config
                .model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .ok_or(LlmBuildError::MissingModel)?;
            HttpLlmClientConfig::openai(&endpoint, api_key, model)
        }
    };
    Ok(http_config
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
        .with_timeout_secs(config.timeout_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ApiAuth;

    #[test]
    fn test_azure_config_builds_deployment_endpoint() {
        let config = CompletionConfig {
            endpoint: Some("https://contoso.openai.azure.com/".to_string()),
            deployment: Some("gpt-35-turbo".to_string()),
            api_key: Some("secret".to_string()),
            max_tokens: Some(256),
            ..CompletionConfig::default()
        };
        let http = http_config_from(&config).expect("config");
        assert_eq!(
            http.endpoint,
            "https://contoso.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2024-02-01"
        );
        assert_eq!(http.auth, ApiAuth::ApiKeyHeader("secret".to_string()));
        assert_eq!(http.model, None);
        assert_eq!(http.max_tokens, Some(256));
    }

    #[test]
    fn test_openai_config_requires_model() {
        let config = CompletionConfig {
            kind: CompletionKind::Openai,
            endpoint: Some("http://localhost:8080/v1".to_string()),
            api_key: Some("sk".to_string()),
            ..CompletionConfig::default()
        };
        assert!(matches!(
            http_config_from(&config),
            Err(LlmBuildError::MissingModel)
        ));

        let config = CompletionConfig {
            model: Some("gpt-4o-mini".to_string()),
            ..config
        };
        let http = http_config_from(&config).expect("config");
        assert_eq!(http.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(http.auth, ApiAuth::Bearer("sk".to_string()));
    }
}

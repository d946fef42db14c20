//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::{AnswerSource, AskdbConfig, CompletionKind};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("{field} is not set inline and env var '{env}' is empty or missing")]
    MissingSecret { field: String, env: String },
}

/// Load and validate configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<AskdbConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parse and validate configuration from YAML text.
pub fn load_config_from_str(content: &str) -> Result<AskdbConfig, ConfigError> {
    let config: AskdbConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &AskdbConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.completion.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "completion.timeout_secs must be > 0".to_string(),
        ));
    }
    if config.planner.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "planner.timeout_secs must be > 0".to_string(),
        ));
    }
    if config.executor.step_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "executor.step_timeout_secs must be > 0".to_string(),
        ));
    }

    if !config.planner.ask_template.contains("{input}") {
        return Err(ConfigError::Invalid(
            "planner.ask_template must contain '{input}'".to_string(),
        ));
    }

    validate_database(config)?;
    validate_output(config)?;
    validate_completion(config)?;

    Ok(())
}

fn validate_database(config: &AskdbConfig) -> Result<(), ConfigError> {
    let database = &config.database;
    if database.namespace.trim().is_empty() || database.operation.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "database.namespace and database.operation must not be empty".to_string(),
        ));
    }
    if database.max_connections == 0 {
        return Err(ConfigError::Invalid(
            "database.max_connections must be > 0".to_string(),
        ));
    }
    if database.max_rows == 0 {
        return Err(ConfigError::Invalid(
            "database.max_rows must be > 0".to_string(),
        ));
    }
    database.resolve_connection_string()?;
    Ok(())
}

fn validate_output(config: &AskdbConfig) -> Result<(), ConfigError> {
    if config.output.marker.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "output.marker must not be empty".to_string(),
        ));
    }
    if config.output.answer_mode == AnswerSource::NamedStep
        && config.output.answer_step_prefix.trim().is_empty()
    {
        return Err(ConfigError::Invalid(
            "output.answer_step_prefix is required when answer_mode is named_step".to_string(),
        ));
    }
    Ok(())
}

fn validate_completion(config: &AskdbConfig) -> Result<(), ConfigError> {
    let completion = &config.completion;
    completion.resolve_api_key()?;
    completion.resolve_endpoint()?;
    match completion.kind {
        CompletionKind::AzureOpenai => {
            completion.resolve_deployment()?;
        }
        CompletionKind::Openai => {
            if completion
                .model
                .as_deref()
                .map_or(true, |m| m.trim().is_empty())
            {
                return Err(ConfigError::Invalid(
                    "completion.model is required for kind 'openai'".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
version: 1
completion:
  kind: azure_openai
  endpoint: https://example.openai.azure.com
  deployment: gpt-35-turbo
  api_key: test-key
database:
  connection_string: "sqlite::memory:"
"#;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = load_config_from_str(MINIMAL).expect("valid config");
        assert_eq!(config.app.name, "askdb");
        assert_eq!(config.completion.api_version, "2024-02-01");
        assert_eq!(config.executor.step_timeout_secs, 60);
        assert_eq!(config.planner.temperature, Some(0.0));
        assert_eq!(
            config.database.resolve_connection_string().expect("conn"),
            "sqlite::memory:"
        );
    }

    #[test]
    fn test_load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "{}output:\n  answer_mode: final_step\n  marker: \"Answer:\"\n",
            MINIMAL
        )
        .expect("write");

        let config = load_config(file.path()).expect("load");
        assert_eq!(config.output.answer_mode, AnswerSource::FinalStep);
        assert_eq!(config.output.marker, "Answer:");
    }

    #[test]
    fn test_validate_rejects_zero_timeouts_and_bad_template() {
        let zero = format!("{}executor:\n  step_timeout_secs: 0\n", MINIMAL);
        assert!(matches!(
            load_config_from_str(&zero),
            Err(ConfigError::Invalid(msg)) if msg.contains("step_timeout_secs")
        ));

        let template = format!("{}planner:\n  ask_template: \"no placeholder\"\n", MINIMAL);
        assert!(matches!(
            load_config_from_str(&template),
            Err(ConfigError::Invalid(msg)) if msg.contains("ask_template")
        ));
    }

    #[test]
    fn test_validate_requires_resolvable_connection_string() {
        let yaml = r#"
completion:
  endpoint: https://example.openai.azure.com
  deployment: gpt-35-turbo
  api_key: test-key
database:
  connection_string_env: ASKDB_TEST_CONNECTION_NEVER_SET
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::MissingSecret { env, .. }) if env == "ASKDB_TEST_CONNECTION_NEVER_SET"
        ));
    }

    #[test]
    fn test_openai_kind_requires_model() {
        let yaml = r#"
completion:
  kind: openai
  api_key: test-key
database:
  connection_string: "sqlite::memory:"
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::Invalid(msg)) if msg.contains("completion.model")
        ));
    }

    #[test]
    fn test_unknown_answer_mode_is_a_parse_error() {
        let yaml = format!("{}output:\n  answer_mode: best_guess\n", MINIMAL);
        assert!(matches!(
            load_config_from_str(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }
}

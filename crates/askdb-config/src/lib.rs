//! # askdb config
//!
//! Single-file configuration. One `askdb.yaml` configures the completion
//! provider, the database, where semantic operations are loaded from, the
//! planner, the executor, output formatting and logging.
//!
//! Secrets are never written into the file directly in production; each secret
//! field has an `*_env` companion naming the environment variable to read.

mod loader;

pub use loader::{load_config, load_config_from_str, ConfigError};

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct AskdbConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for AskdbConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            completion: CompletionConfig::default(),
            database: DatabaseConfig::default(),
            operations: OperationsConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            output: OutputConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Example questions offered to users.
    #[serde(default = "default_suggested_queries")]
    pub suggested_queries: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            suggested_queries: default_suggested_queries(),
        }
    }
}

fn default_app_name() -> String {
    "askdb".to_string()
}

fn default_suggested_queries() -> Vec<String> {
    vec![
        "I want to know how many transactions in the last 3 months".to_string(),
        "Give me the name of the best seller in terms of sales volume in the whole period"
            .to_string(),
        "Which product has the highest sales volume in the last month".to_string(),
    ]
}

/// Completion provider flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    #[default]
    AzureOpenai,
    Openai,
}

/// Text-completion provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub kind: CompletionKind,
    /// Base URL. Azure: the resource endpoint; OpenAI: defaults to the public API.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub endpoint_env: Option<String>,
    /// Azure deployment name.
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub deployment_env: Option<String>,
    /// Model name (OpenAI).
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            kind: CompletionKind::default(),
            endpoint: None,
            endpoint_env: None,
            deployment: None,
            deployment_env: None,
            model: None,
            api_key: None,
            api_key_env: None,
            api_version: default_api_version(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

impl CompletionConfig {
    /// Resolve the base URL: inline value, then env var, then the provider default.
    pub fn resolve_endpoint(&self) -> Result<String, ConfigError> {
        let env_name = self.endpoint_env.as_deref().unwrap_or(match self.kind {
            CompletionKind::AzureOpenai => "AZURE_OPENAI_ENDPOINT",
            CompletionKind::Openai => "OPENAI_BASE_URL",
        });
        match (self.kind, resolve("completion.endpoint", &self.endpoint, env_name)) {
            (CompletionKind::Openai, Err(ConfigError::MissingSecret { .. })) => {
                Ok(OPENAI_DEFAULT_ENDPOINT.to_string())
            }
            (_, resolved) => resolved,
        }
    }

    /// Azure deployment name: inline value, then env var.
    pub fn resolve_deployment(&self) -> Result<String, ConfigError> {
        let env_name = self
            .deployment_env
            .as_deref()
            .unwrap_or("AZURE_OPENAI_DEPLOYMENT_NAME");
        resolve("completion.deployment", &self.deployment, env_name)
    }

    /// Resolve the API key: inline value, then env var.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        let env_name = self.api_key_env.as_deref().unwrap_or(match self.kind {
            CompletionKind::AzureOpenai => "AZURE_OPENAI_API_KEY",
            CompletionKind::Openai => "OPENAI_API_KEY",
        });
        resolve("completion.api_key", &self.api_key, env_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx URL, e.g. `postgres://..`, `mysql://..`, `sqlite::memory:`.
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default = "default_connection_string_env")]
    pub connection_string_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Namespace of the native query operation.
    #[serde(default = "default_database_namespace")]
    pub namespace: String,
    /// Name of the native query operation.
    #[serde(default = "default_database_operation")]
    pub operation: String,
    /// Rows rendered per result; the rest are summarised.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Allow statements other than queries (INSERT, UPDATE, DDL, ...).
    #[serde(default)]
    pub allow_writes: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            connection_string_env: default_connection_string_env(),
            max_connections: default_max_connections(),
            namespace: default_database_namespace(),
            operation: default_database_operation(),
            max_rows: default_max_rows(),
            allow_writes: false,
        }
    }
}

impl DatabaseConfig {
    pub fn resolve_connection_string(&self) -> Result<String, ConfigError> {
        resolve(
            "database.connection_string",
            &self.connection_string,
            &self.connection_string_env,
        )
    }
}

fn default_connection_string_env() -> String {
    "CONNECTION_STRING".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_database_namespace() -> String {
    "QueryDb".to_string()
}

fn default_database_operation() -> String {
    "RunQuery".to_string()
}

fn default_max_rows() -> usize {
    200
}

/// Where semantic operation descriptors are loaded from.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
    /// Root directory: `<directory>/<namespace>/<Function>/{prompt.txt,config.yaml}`.
    #[serde(default = "default_operations_directory")]
    pub directory: PathBuf,
    /// Load only this namespace; all namespaces when unset.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            directory: default_operations_directory(),
            namespace: None,
        }
    }
}

fn default_operations_directory() -> PathBuf {
    PathBuf::from("config/operations")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// Wraps the user's text into the planner goal; `{input}` is replaced.
    #[serde(default = "default_ask_template")]
    pub ask_template: String,
    #[serde(default = "default_planner_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_planner_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Appended to the planner's system prompt.
    #[serde(default)]
    pub extra_instructions: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            ask_template: default_ask_template(),
            temperature: default_planner_temperature(),
            max_tokens: default_planner_max_tokens(),
            timeout_secs: default_timeout_secs(),
            extra_instructions: None,
        }
    }
}

fn default_ask_template() -> String {
    "Create a SQL query according to the following request: {input} and query the database to get the result."
        .to_string()
}

fn default_planner_temperature() -> Option<f32> {
    Some(0.0)
}

fn default_planner_max_tokens() -> Option<u32> {
    Some(1024)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Which step output becomes the answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    #[default]
    NamedStep,
    FinalStep,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub answer_mode: AnswerSource,
    #[serde(default = "default_answer_step_prefix")]
    pub answer_step_prefix: String,
    #[serde(default = "default_marker")]
    pub marker: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            answer_mode: AnswerSource::default(),
            answer_step_prefix: default_answer_step_prefix(),
            marker: default_marker(),
        }
    }
}

fn default_answer_step_prefix() -> String {
    "Write a friendly response".to_string()
}

fn default_marker() -> String {
    "Message ->".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write logs to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn resolve(field: &str, inline: &Option<String>, env_name: &str) -> Result<String, ConfigError> {
    if let Some(value) = inline.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    std::env::var(env_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingSecret {
            field: field.to_string(),
            env: env_name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_the_reference_deployment() {
        let config = AskdbConfig::default();
        assert_eq!(config.app.suggested_queries.len(), 3);
        assert_eq!(config.database.namespace, "QueryDb");
        assert_eq!(config.database.operation, "RunQuery");
        assert_eq!(config.output.marker, "Message ->");
        assert_eq!(config.output.answer_mode, AnswerSource::NamedStep);
        assert_eq!(
            config.planner.ask_template,
            "Create a SQL query according to the following request: {input} and query the database to get the result."
        );
    }

    #[test]
    fn test_inline_secret_wins_over_env() {
        let completion = CompletionConfig {
            api_key: Some("  inline-key ".to_string()),
            api_key_env: Some("ASKDB_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..CompletionConfig::default()
        };
        assert_eq!(completion.resolve_api_key().expect("key"), "inline-key");
    }

    #[test]
    fn test_missing_secret_names_the_env_var() {
        let database = DatabaseConfig {
            connection_string_env: "ASKDB_TEST_CONN_THAT_IS_NEVER_SET".to_string(),
            ..DatabaseConfig::default()
        };
        match database.resolve_connection_string() {
            Err(ConfigError::MissingSecret { field, env }) => {
                assert_eq!(field, "database.connection_string");
                assert_eq!(env, "ASKDB_TEST_CONN_THAT_IS_NEVER_SET");
            }
            other => panic!("expected missing secret, got {:?}", other),
        }
    }

    #[test]
    fn test_openai_endpoint_falls_back_to_public_api() {
        let completion = CompletionConfig {
            kind: CompletionKind::Openai,
            endpoint_env: Some("ASKDB_TEST_ENDPOINT_THAT_IS_NEVER_SET".to_string()),
            ..CompletionConfig::default()
        };
        assert_eq!(
            completion.resolve_endpoint().expect("endpoint"),
            "https://api.openai.com/v1"
        );
    }
}

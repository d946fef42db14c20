//! Build the operation registry from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use askdb_config::{AskdbConfig, ConfigError, DatabaseConfig};
use askdb_core::completion::LlmClient;
use askdb_core::operation::{OperationRef, TemplateError};
use askdb_core::registry::{OperationRegistry, RegistryError};

use crate::loader::load_semantic_operations;
use crate::sql::{SqlQuery, SqlQuerySettings};

/// Errors raised while assembling operations
#[derive(Debug, Error)]
pub enum OperationBuildError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid prompt template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },

    #[error("invalid operation '{operation}': {reason}")]
    InvalidDescriptor { operation: String, reason: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Create the SQL query operation backend from the database section.
pub fn build_sql_query(
    config: &DatabaseConfig,
    marker: &str,
) -> Result<SqlQuery, OperationBuildError> {
    let url = config.resolve_connection_string()?;
    let settings = SqlQuerySettings {
        max_rows: config.max_rows,
        allow_writes: config.allow_writes,
        marker: marker.to_string(),
    };
    tracing::info!(
        max_connections = config.max_connections,
        allow_writes = config.allow_writes,
        "database pool configured"
    );
    Ok(SqlQuery::connect_lazy(
        &url,
        config.max_connections,
        settings,
    )?)
}

/// Register the SQL query operation plus every semantic operation on disk.
pub fn build_registry(
    config: &AskdbConfig,
    client: Arc<dyn LlmClient>,
    sql: SqlQuery,
) -> Result<OperationRegistry, OperationBuildError> {
    let mut registry = OperationRegistry::new();

    let sql_ref = OperationRef::new(&config.database.namespace, &config.database.operation);
    registry.register(Arc::new(sql.into_operation(sql_ref)))?;

    let semantic = load_semantic_operations(
        &config.operations.directory,
        config.operations.namespace.as_deref(),
        client,
    )?;
    for operation in semantic {
        registry.register(Arc::new(operation))?;
    }

    tracing::info!(operations = registry.len(), "operation registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdb_core::completion::{LlmError, LlmRequest};
    use async_trait::async_trait;
    use std::fs;

    struct NoopClient;

    #[async_trait]
    impl LlmClient for NoopClient {
        async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
            Ok(String::new())
        }
    }

    fn config_for(dir: &std::path::Path) -> AskdbConfig {
        let mut config = AskdbConfig::default();
        config.database.connection_string = Some(format!(
            "sqlite://{}?mode=rwc",
            dir.join("askdb.db").display()
        ));
        config.operations.directory = dir.join("operations");
        config
    }

    fn write_prompt(dir: &std::path::Path, namespace: &str, name: &str) {
        let op_dir = dir.join("operations").join(namespace).join(name);
        fs::create_dir_all(&op_dir).expect("mkdir");
        fs::write(op_dir.join("prompt.txt"), "{{$input}}").expect("write");
    }

    #[tokio::test]
    async fn test_build_registry_registers_sql_and_semantic_operations() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_prompt(dir.path(), "nlpToSql", "GenerateSql");
        write_prompt(dir.path(), "nlpToSql", "WriteFriendlyResponse");
        let config = config_for(dir.path());

        let sql = build_sql_query(&config.database, &config.output.marker).expect("sql");
        let registry = build_registry(&config, Arc::new(NoopClient), sql).expect("registry");

        let names: Vec<_> = registry
            .catalog()
            .into_iter()
            .map(|meta| meta.reference.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "QueryDb.RunQuery",
                "nlpToSql.GenerateSql",
                "nlpToSql.WriteFriendlyResponse"
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_operation_reference_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_prompt(dir.path(), "QueryDb", "RunQuery");
        let config = config_for(dir.path());

        let sql = build_sql_query(&config.database, &config.output.marker).expect("sql");
        let err = build_registry(&config, Arc::new(NoopClient), sql)
            .err()
            .expect("duplicate");
        assert!(matches!(
            err,
            OperationBuildError::Registry(RegistryError::DuplicateOperation(_))
        ));
    }

    #[test]
    fn test_missing_connection_string_is_config_error() {
        let mut database = DatabaseConfig::default();
        database.connection_string = None;
        database.connection_string_env = "ASKDB_TEST_UNSET_CONNECTION_STRING".to_string();
        let err = build_sql_query(&database, "Message ->")
            .err()
            .expect("missing secret");
        assert!(matches!(
            err,
            OperationBuildError::Config(ConfigError::MissingSecret { .. })
        ));
    }
}

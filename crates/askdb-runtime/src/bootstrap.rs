//! Bootstrap helpers for starting askdb from a single YAML config.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;

use askdb_config::{load_config, AnswerSource, AskdbConfig, ConfigError, ObservabilityConfig};
use askdb_core::completion::LlmClient;
use askdb_core::executor::{ExecutionProgressReporter, Executor};
use askdb_core::output::{AnswerMode, OutputFormatter};
use askdb_operations::{build_registry, build_sql_query, OperationBuildError};
use askdb_planners::{build_client_from_config, LlmBuildError, LlmPlanner, LlmPlannerConfig};

use crate::service::QueryService;

/// Runtime bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("completion client build error: {0}")]
    Client(#[from] LlmBuildError),
    #[error("operation build error: {0}")]
    Operations(#[from] OperationBuildError),
}

/// Optional overrides applied while building the runtime.
#[derive(Default)]
pub struct RuntimeOptions {
    client: Option<Arc<dyn LlmClient>>,
    progress_reporter: Option<Arc<dyn ExecutionProgressReporter>>,
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this completion client instead of building one from `completion`.
    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ExecutionProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }
}

/// Running app bundle created from config.
pub struct RuntimeApp {
    pub config: AskdbConfig,
    pub service: Arc<QueryService>,
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

impl RuntimeApp {
    /// Create a runnable app from a single `askdb.yaml`.
    pub async fn from_config_path(
        path: impl AsRef<Path>,
        options: RuntimeOptions,
    ) -> Result<Self, BootstrapError> {
        let config = load_config(path.as_ref())?;
        Self::from_config(config, options).await
    }

    /// Create a runnable app from an already loaded config.
    pub async fn from_config(
        config: AskdbConfig,
        options: RuntimeOptions,
    ) -> Result<Self, BootstrapError> {
        init_tracing_if_needed(&config.observability);

        let client = match options.client {
            Some(client) => client,
            None => build_client_from_config(&config.completion)?,
        };

        let sql = build_sql_query(&config.database, &config.output.marker)?;
        let registry = Arc::new(build_registry(&config, client.clone(), sql)?);

        let answer_mode = match config.output.answer_mode {
            AnswerSource::NamedStep => AnswerMode::NamedStep,
            AnswerSource::FinalStep => AnswerMode::FinalStep,
        };
        let answer_step_prefix = matches!(answer_mode, AnswerMode::NamedStep)
            .then(|| config.output.answer_step_prefix.clone());
        let planner = LlmPlanner::new(
            client,
            LlmPlannerConfig {
                temperature: config.planner.temperature,
                max_tokens: config.planner.max_tokens,
                timeout: Duration::from_secs(config.planner.timeout_secs),
                extra_instructions: config.planner.extra_instructions.clone(),
                answer_step_prefix,
                ..LlmPlannerConfig::default()
            },
        );

        let mut executor = Executor::new(registry)
            .with_step_timeout(Duration::from_secs(config.executor.step_timeout_secs));
        if let Some(reporter) = options.progress_reporter {
            executor = executor.with_progress_reporter(reporter);
        }

        let formatter = OutputFormatter::new()
            .with_marker(config.output.marker.clone())
            .with_answer_mode(answer_mode)
            .with_answer_step_prefix(config.output.answer_step_prefix.clone());

        let service = QueryService::new(Arc::new(planner), executor, formatter)
            .with_ask_template(config.planner.ask_template.clone())
            .with_suggestions(config.app.suggested_queries.clone());

        tracing::info!(
            app = %config.app.name,
            operations = service.catalog().len(),
            "askdb runtime ready"
        );
        Ok(Self {
            config,
            service: Arc::new(service),
        })
    }
}

fn init_tracing_if_needed(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file_path = std::env::var("ASKDB_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| observability.log_file.clone());
        let file_writer = log_file_path.as_deref().and_then(create_log_writer);
        let fallback_level = match observability.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        };

        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        // stdout is reserved for answers, so console logs go to stderr.
        match file_writer {
            Some(writer) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .try_init();
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }

        tracing::info!(
            log_level = %observability.log_level,
            log_file = log_file_path.as_deref().unwrap_or("(stderr)"),
            "tracing initialized"
        );
    });
}

fn create_log_writer(path: &str) -> Option<SharedFileMakeWriter> {
    use std::fs::{create_dir_all, OpenOptions};

    let file_path = Path::new(path);
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = create_dir_all(parent) {
                eprintln!(
                    "failed to create log directory '{}': {}",
                    parent.display(),
                    err
                );
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(file_path) {
        Ok(file) => Some(SharedFileMakeWriter::new(file)),
        Err(err) => {
            eprintln!("failed to open log file '{}': {}", file_path.display(), err);
            None
        }
    }
}

#[derive(Clone)]
struct SharedFileMakeWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl SharedFileMakeWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

struct SharedFileWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileMakeWriter {
    type Writer = SharedFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            file: self.file.clone(),
        }
    }
}

impl std::io::Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file mutex poisoned"))?;
        std::io::Write::write(&mut *file, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file mutex poisoned"))?;
        std::io::Write::flush(&mut *file)
    }
}

//! Query service: user text -> plan -> execution -> answer and trace.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use askdb_core::completion::truncate_for_log;
use askdb_core::executor::{ExecutionError, Executor};
use askdb_core::operation::OperationMeta;
use askdb_core::output::{OutputError, OutputFormatter};
use askdb_core::planner::{PlanError, Planner};
use askdb_core::types::ExecutionContext;

const MAX_INPUT_LOG_CHARS: usize = 500;
const DEFAULT_ASK_TEMPLATE: &str = "{input}";

/// Answer plus the markdown trace of the run that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub execution_id: String,
    pub answer: String,
    pub trace: String,
    pub completed_at: DateTime<Utc>,
}

/// Query errors. Failures after planning carry the trace of the partial run.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query text is empty")]
    EmptyInput,

    #[error("query cancelled")]
    Cancelled,

    #[error("planning failed: {0}")]
    Planning(#[from] PlanError),

    #[error("execution failed: {source}")]
    Execution {
        #[source]
        source: ExecutionError,
        trace: String,
    },

    #[error("no answer: {source}")]
    Output {
        #[source]
        source: OutputError,
        trace: String,
    },
}

impl QueryError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::Cancelled => "cancelled",
            Self::Planning(_) => "planning_failed",
            Self::Execution { .. } => "execution_failed",
            Self::Output { .. } => "no_answer",
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Execution { trace, .. } | Self::Output { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

/// Plans, executes and formats one query at a time. Shareable across tasks;
/// every call gets its own context.
pub struct QueryService {
    planner: Arc<dyn Planner>,
    executor: Executor,
    formatter: OutputFormatter,
    ask_template: String,
    suggestions: Vec<String>,
}

impl QueryService {
    pub fn new(planner: Arc<dyn Planner>, executor: Executor, formatter: OutputFormatter) -> Self {
        Self {
            planner,
            executor,
            formatter,
            ask_template: DEFAULT_ASK_TEMPLATE.to_string(),
            suggestions: Vec::new(),
        }
    }

    /// Template turning user text into the planner goal; `{input}` is replaced.
    pub fn with_ask_template(mut self, template: impl Into<String>) -> Self {
        self.ask_template = template.into();
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn catalog(&self) -> Vec<OperationMeta> {
        self.executor.registry().catalog()
    }

    pub fn goal_for(&self, input: &str) -> String {
        self.ask_template.replace("{input}", input)
    }

    pub async fn submit_query(&self, input: &str) -> Result<QueryResponse, QueryError> {
        self.submit_query_with_cancel(input, &CancellationToken::new())
            .await
    }

    /// Like [`QueryService::submit_query`]; `cancel` aborts planning and stops
    /// execution before the next step.
    pub async fn submit_query_with_cancel(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(QueryError::EmptyInput);
        }
        let started = Instant::now();
        let goal = self.goal_for(input);
        tracing::info!(
            input = %truncate_for_log(input, MAX_INPUT_LOG_CHARS),
            "query received"
        );

        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            plan = self.planner.create_plan(&goal, self.executor.registry()) => plan?,
        };
        tracing::info!(steps = plan.len(), "plan created");

        let execution = self
            .executor
            .execute(&plan, ExecutionContext::new(goal), cancel)
            .await;
        let execution_id = execution.execution_id().to_string();

        if let Err(source) = execution.status {
            let trace = self
                .formatter
                .render_trace(&plan, &execution.context, &execution.outcomes);
            tracing::warn!(
                execution_id = %execution_id,
                step_index = ?source.step_index(),
                error = %source,
                "query failed during execution"
            );
            return Err(QueryError::Execution { source, trace });
        }

        let answer = match self.formatter.answer(&plan, &execution.context) {
            Ok(answer) => answer,
            Err(source) => {
                let trace = self
                    .formatter
                    .render_trace(&plan, &execution.context, &execution.outcomes);
                return Err(QueryError::Output { source, trace });
            }
        };
        let trace = self.formatter.render_report(
            input,
            &answer,
            &plan,
            &execution.context,
            &execution.outcomes,
        );
        tracing::info!(
            execution_id = %execution_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );

        Ok(QueryResponse {
            execution_id,
            answer,
            trace,
            completed_at: Utc::now(),
        })
    }
}

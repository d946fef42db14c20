//! Executor module
//!
//! The Executor is responsible for:
//! - Running a plan's steps strictly in list order, one at a time
//! - Resolving each step's inputs from the execution context
//! - Writing results back to the context under the step's output keys
//! - Halting on the first failure (no retries, no best-effort continuation)

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::completion::truncate_for_log;
use crate::normalizer::{validate_plan, ValidationError};
use crate::operation::{InvokeError, OperationContext, OperationInput, OperationMeta, OperationRef};
use crate::registry::OperationRegistry;
use crate::types::{ExecutionContext, InputBinding, Plan, Step};

const MAX_LOG_TEXT_CHARS: usize = 2_000;
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Step state during execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Not reached yet (or never reached because an earlier step halted the plan)
    Pending,
    /// Currently executing
    Running,
    /// Completed; outputs written to the context
    Succeeded,
    /// Failed; the plan halted here
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step_index: usize,
    pub description: String,
    pub operation: OperationRef,
    pub state: StepState,
    /// Raw operation result, when the step succeeded
    pub output: Option<String>,
    /// Failure message, when the step failed
    pub error: Option<String>,
    pub elapsed_ms: Option<u64>,
}

impl StepOutcome {
    fn pending(step_index: usize, step: &Step) -> Self {
        Self {
            step_index,
            description: step.description.clone(),
            operation: step.operation.clone(),
            state: StepState::Pending,
            output: None,
            error: None,
            elapsed_ms: None,
        }
    }
}

/// An operation invocation failed
#[derive(Debug, Clone, Error)]
#[error("step {step_index} ('{description}', {operation}) failed: {source}")]
pub struct StepExecutionError {
    pub step_index: usize,
    pub description: String,
    pub operation: OperationRef,
    #[source]
    pub source: InvokeError,
}

/// Execution errors
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("plan rejected before execution: {0}")]
    InvalidPlan(#[from] ValidationError),

    #[error("step {step_index}: parameter '{parameter}' reads '{key}', which is not in the context")]
    UnresolvedInput {
        step_index: usize,
        parameter: String,
        key: String,
    },

    #[error(transparent)]
    StepFailed(#[from] StepExecutionError),

    #[error("execution cancelled before step {step_index}")]
    Cancelled { step_index: usize },
}

impl ExecutionError {
    /// Index of the step the plan halted at, if execution started.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::InvalidPlan(_) => None,
            Self::UnresolvedInput { step_index, .. } | Self::Cancelled { step_index } => {
                Some(*step_index)
            }
            Self::StepFailed(err) => Some(err.step_index),
        }
    }
}

/// Result of running a plan: the context and per-step outcomes are kept even
/// when execution halted, so earlier outputs stay inspectable.
#[derive(Debug, Clone)]
pub struct Execution {
    pub context: ExecutionContext,
    pub outcomes: Vec<StepOutcome>,
    pub status: Result<(), ExecutionError>,
}

impl Execution {
    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.status.as_ref().err()
    }

    pub fn execution_id(&self) -> &str {
        self.context.execution_id()
    }
}

/// Realtime execution progress event.
#[derive(Debug, Clone)]
pub struct ExecutionProgressEvent {
    pub execution_id: String,
    pub step_index: Option<usize>,
    pub operation: Option<OperationRef>,
    /// Phase label: step_started/step_succeeded/step_failed/plan_completed/plan_failed.
    pub phase: String,
    pub message: Option<String>,
}

impl ExecutionProgressEvent {
    pub fn new(
        execution_id: impl Into<String>,
        step_index: Option<usize>,
        operation: Option<OperationRef>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_index,
            operation,
            phase: phase.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Sink interface for execution progress reporting.
#[async_trait]
pub trait ExecutionProgressReporter: Send + Sync {
    async fn report(&self, event: ExecutionProgressEvent) -> Result<(), String>;
}

/// The executor - runs validated plans against a shared registry
pub struct Executor {
    registry: Arc<OperationRegistry>,
    step_timeout: Duration,
    progress_reporter: Option<Arc<dyn ExecutionProgressReporter>>,
}

impl Executor {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            progress_reporter: None,
        }
    }

    /// Upper bound on a single operation invocation.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Attach a realtime execution progress reporter.
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ExecutionProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Run a plan in a fresh context seeded with the plan's goal.
    pub async fn invoke(&self, plan: &Plan) -> Execution {
        self.execute(
            plan,
            ExecutionContext::new(plan.goal.clone()),
            &CancellationToken::new(),
        )
        .await
    }

    /// Run a plan in the given context. `cancel` is checked before every step.
    pub async fn execute(
        &self,
        plan: &Plan,
        mut context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> Execution {
        let mut outcomes: Vec<StepOutcome> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepOutcome::pending(index, step))
            .collect();

        let seed_keys: Vec<String> = context.keys().map(str::to_string).collect();
        if let Err(err) = validate_plan(plan, &self.registry, &seed_keys) {
            tracing::warn!(
                execution_id = %context.execution_id(),
                error = %err,
                "plan rejected before execution"
            );
            return Execution {
                context,
                outcomes,
                status: Err(err.into()),
            };
        }

        tracing::info!(
            execution_id = %context.execution_id(),
            step_count = plan.steps.len(),
            "plan execution started"
        );
        let started = Instant::now();

        for (step_index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    execution_id = %context.execution_id(),
                    step_index,
                    "plan execution cancelled"
                );
                let err = ExecutionError::Cancelled { step_index };
                self.report(
                    ExecutionProgressEvent::new(context.execution_id(), None, None, "plan_failed")
                        .with_message(err.to_string()),
                )
                .await;
                return Execution {
                    context,
                    outcomes,
                    status: Err(err),
                };
            }

            let outcome = &mut outcomes[step_index];
            outcome.state = StepState::Running;
            if let Err(err) = self
                .run_step(step_index, step, &mut context, outcome, cancel)
                .await
            {
                outcome.state = StepState::Failed;
                outcome.error = Some(match &err {
                    ExecutionError::StepFailed(failed) => failed.source.to_string(),
                    other => other.to_string(),
                });
                self.report(
                    ExecutionProgressEvent::new(
                        context.execution_id(),
                        Some(step_index),
                        Some(step.operation.clone()),
                        "step_failed",
                    )
                    .with_message(err.to_string()),
                )
                .await;
                self.report(
                    ExecutionProgressEvent::new(context.execution_id(), None, None, "plan_failed")
                        .with_message(err.to_string()),
                )
                .await;
                return Execution {
                    context,
                    outcomes,
                    status: Err(err),
                };
            }
        }

        tracing::info!(
            execution_id = %context.execution_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plan execution completed"
        );
        self.report(ExecutionProgressEvent::new(
            context.execution_id(),
            None,
            None,
            "plan_completed",
        ))
        .await;
        Execution {
            context,
            outcomes,
            status: Ok(()),
        }
    }

    async fn run_step(
        &self,
        step_index: usize,
        step: &Step,
        context: &mut ExecutionContext,
        outcome: &mut StepOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let operation = self.registry.get(&step.operation).map_err(|_| {
            ValidationError::UnknownOperation {
                step_index,
                operation: step.operation.clone(),
            }
        })?;
        let input = resolve_inputs(step_index, step, operation.metadata(), context)?;

        tracing::info!(
            execution_id = %context.execution_id(),
            step_index,
            operation = %step.operation,
            description = %step.description,
            "step execution started"
        );
        self.report(ExecutionProgressEvent::new(
            context.execution_id(),
            Some(step_index),
            Some(step.operation.clone()),
            "step_started",
        ))
        .await;

        let op_ctx = OperationContext::new(context.execution_id(), step_index)
            .with_cancellation_token(cancel.clone());
        let started = Instant::now();
        let result = match tokio::time::timeout(self.step_timeout, operation.invoke(input, op_ctx))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(InvokeError::Timeout(self.step_timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        outcome.elapsed_ms = Some(elapsed_ms);

        let output = result.map_err(|source| {
            tracing::warn!(
                execution_id = %context.execution_id(),
                step_index,
                operation = %step.operation,
                elapsed_ms,
                error = %source,
                "step execution failed"
            );
            StepExecutionError {
                step_index,
                description: step.description.clone(),
                operation: step.operation.clone(),
                source,
            }
        })?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                execution_id = %context.execution_id(),
                step_index,
                output = %truncate_for_log(&output, MAX_LOG_TEXT_CHARS),
                "step output"
            );
        }
        for key in &step.output_keys {
            context.set(key.clone(), output.clone());
        }
        outcome.output = Some(output);
        outcome.state = StepState::Succeeded;

        tracing::info!(
            execution_id = %context.execution_id(),
            step_index,
            operation = %step.operation,
            elapsed_ms,
            "step execution completed"
        );
        self.report(ExecutionProgressEvent::new(
            context.execution_id(),
            Some(step_index),
            Some(step.operation.clone()),
            "step_succeeded",
        ))
        .await;
        Ok(())
    }

    async fn report(&self, event: ExecutionProgressEvent) {
        if let Some(reporter) = &self.progress_reporter {
            if let Err(err) = reporter.report(event).await {
                tracing::warn!("failed to report execution progress: {}", err);
            }
        }
    }
}

/// Bind parameter values from the context. Unbound parameters fall back to
/// their declared default.
fn resolve_inputs(
    step_index: usize,
    step: &Step,
    meta: &OperationMeta,
    context: &ExecutionContext,
) -> Result<OperationInput, ExecutionError> {
    let mut input = OperationInput::new();
    for (parameter, binding) in &step.input_bindings {
        let value = match binding {
            InputBinding::Literal(text) => text.clone(),
            InputBinding::Variable(key) => context
                .get(key)
                .ok_or_else(|| ExecutionError::UnresolvedInput {
                    step_index,
                    parameter: parameter.clone(),
                    key: key.clone(),
                })?
                .to_string(),
        };
        input.values.insert(parameter.clone(), value);
    }
    for parameter in &meta.parameters {
        if let Some(default) = &parameter.default {
            input
                .values
                .entry(parameter.name.clone())
                .or_insert_with(|| default.clone());
        }
    }
    Ok(input)
}

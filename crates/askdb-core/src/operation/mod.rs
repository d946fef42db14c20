//! Operation abstraction module
//!
//! An operation is a named capability a plan step can invoke:
//! - Semantic: renders a prompt template and asks the completion capability
//! - Native: calls ordinary code (e.g. run a query against the database)
//!
//! The executor only ever calls [`Operation::invoke`]; it never branches on the
//! concrete kind.

mod native;
mod semantic;
mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::completion::LlmError;

pub use native::{NativeFunction, NativeOperation};
pub use semantic::{CompletionSettings, SemanticOperation};
pub use template::{PromptTemplate, TemplateError};

/// Fully-qualified operation name: `namespace.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationRef {
    pub namespace: String,
    pub name: String,
}

impl OperationRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace.name`. The namespace ends at the first dot.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (namespace, name) = qualified.trim().split_once('.')?;
        let (namespace, name) = (namespace.trim(), name.trim());
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Operation flavour, reported to the planner and in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Semantic,
    Native,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semantic => f.write_str("semantic"),
            Self::Native => f.write_str("native"),
        }
    }
}

/// A declared operation parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Value used when a step leaves the parameter unbound. No default means required.
    #[serde(default)]
    pub default: Option<String>,
}

impl ParameterMeta {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default: Some(default.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Operation metadata for planner and registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMeta {
    pub reference: OperationRef,
    pub kind: OperationKind,
    pub description: String,
    pub parameters: Vec<ParameterMeta>,
}

impl OperationMeta {
    pub fn new(
        reference: OperationRef,
        kind: OperationKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            reference,
            kind,
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterMeta) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<ParameterMeta>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterMeta> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Resolved input values, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationInput {
    pub values: BTreeMap<String, String>,
}

impl OperationInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Get a value or fail with [`InvokeError::MissingInput`].
    pub fn require(&self, name: &str) -> Result<&str, InvokeError> {
        self.get(name)
            .ok_or_else(|| InvokeError::MissingInput(name.to_string()))
    }
}

/// Per-invocation context handed to an operation
#[derive(Clone)]
pub struct OperationContext {
    /// Execution ID of the plan run this invocation belongs to
    pub execution_id: String,
    /// Index of the invoking step
    pub step_index: usize,
    /// Cancellation token for cooperative cancellation
    pub cancellation_token: CancellationToken,
}

impl OperationContext {
    pub fn new(execution_id: impl Into<String>, step_index: usize) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_index,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("execution_id", &self.execution_id)
            .field("step_index", &self.step_index)
            .finish_non_exhaustive()
    }
}

/// Operation invocation errors
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("completion failed: {0}")]
    Completion(#[from] LlmError),

    #[error("template render failed: {0}")]
    Template(#[from] TemplateError),

    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("{0}")]
    Native(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl InvokeError {
    pub fn native(message: impl Into<String>) -> Self {
        Self::Native(message.into())
    }
}

/// Operation trait - the unit a plan step invokes
#[async_trait]
pub trait Operation: Send + Sync {
    /// Metadata (reference, kind, description, parameters)
    fn metadata(&self) -> &OperationMeta;

    /// Fully-qualified reference
    fn reference(&self) -> &OperationRef {
        &self.metadata().reference
    }

    /// Invoke with parameter values already resolved from the context
    async fn invoke(
        &self,
        input: OperationInput,
        ctx: OperationContext,
    ) -> Result<String, InvokeError>;
}

//! # askdb core
//!
//! Deterministic core of the askdb plan engine.
//!
//! This crate contains:
//! - Operation abstraction (semantic and native) and the operation registry
//! - Plan / Step / ExecutionContext definitions
//! - Planner contract, plan normalizer and validator
//! - Sequential executor and output formatting
//!
//! This crate does NOT care about:
//! - Which completion provider is behind [`completion::LlmClient`]
//! - Where configuration or credentials come from
//! - How answers are displayed

pub mod completion;
pub mod executor;
pub mod normalizer;
pub mod operation;
pub mod output;
pub mod planner;
pub mod registry;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::completion::{LlmClient, LlmError, LlmRequest};
    pub use crate::executor::{
        Execution, ExecutionError, ExecutionProgressEvent, ExecutionProgressReporter, Executor,
        StepExecutionError, StepOutcome, StepState,
    };
    pub use crate::normalizer::{PlanFixer, PlanNormalizer, PlanValidator, ValidationError};
    pub use crate::operation::{
        CompletionSettings, InvokeError, NativeFunction, NativeOperation, Operation,
        OperationContext, OperationInput, OperationKind, OperationMeta, OperationRef,
        ParameterMeta, PromptTemplate, SemanticOperation,
    };
    pub use crate::output::{AnswerMode, OutputError, OutputFormatter};
    pub use crate::planner::{PlanError, Planner};
    pub use crate::registry::{OperationRegistry, RegistryError};
    pub use crate::types::{ExecutionContext, InputBinding, Plan, Step, GOAL_KEY};
}

// Re-export key types at crate root
pub use executor::{Execution, ExecutionError, Executor};
pub use operation::{Operation, OperationRef};
pub use planner::{PlanError, Planner};
pub use registry::{OperationRegistry, RegistryError};
pub use types::{ExecutionContext, Plan, Step};

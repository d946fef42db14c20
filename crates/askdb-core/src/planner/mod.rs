//! Planner module
//!
//! The Planner is responsible for:
//! - Decomposing a goal into an ordered list of steps
//! - Choosing an operation per step and binding its inputs/outputs
//!
//! The Planner does NOT handle:
//! - Running anything (that is the executor's job)
//! - Recovering from step failures or re-planning

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::completion::LlmError;
use crate::normalizer::ValidationError;
use crate::registry::OperationRegistry;
use crate::types::Plan;

/// Plan generation errors. No partial plan accompanies any of these.
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("goal is empty")]
    EmptyGoal,

    #[error("completion failed: {0}")]
    Completion(#[from] LlmError),

    #[error("planner timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to parse plan: {0}")]
    Parse(String),

    #[error("invalid plan: {0}")]
    Invalid(#[from] ValidationError),
}

/// Planner trait - turns a goal into a validated plan
///
/// Implementations must only return plans that pass
/// [`crate::normalizer::validate_plan`] against the same registry.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, goal: &str, registry: &OperationRegistry)
        -> Result<Plan, PlanError>;
}

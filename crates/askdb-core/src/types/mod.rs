//! Core type definitions
//!
//! - Step: one bound invocation of an operation
//! - Plan: ordered steps derived from a goal
//! - ExecutionContext: per-run variables threaded between steps

mod context;
mod plan;
mod step;

pub use context::{ExecutionContext, GOAL_KEY};
pub use plan::Plan;
pub use step::{InputBinding, Step};

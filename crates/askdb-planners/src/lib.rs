//! Planner implementations for askdb.
//!
//! This crate provides:
//! - HTTP completion clients (OpenAI-compatible and Azure OpenAI)
//! - Mock and scripted clients for tests and offline runs
//! - `LlmPlanner`, which asks a completion client to decompose a goal into a plan
//!
//! Use `build_client_from_config` to create a client from configuration.

mod factory;
mod http;
mod llm;
mod mock;

pub use factory::{build_client_from_config, LlmBuildError};
pub use http::{ApiAuth, HttpLlmClient, HttpLlmClientConfig};
pub use llm::{LlmPlanner, LlmPlannerConfig};
pub use mock::{MockLlmClient, ScriptedLlmClient};

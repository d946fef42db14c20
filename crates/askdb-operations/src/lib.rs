//! Operations for askdb.
//!
//! - `SqlQuery`: native operation running generated SQL through sqlx
//! - `load_semantic_operations`: prompt-template operations from a directory tree
//! - `build_registry`: the full operation set for one deployment

mod factory;
mod loader;
mod sql;

pub use factory::{build_registry, build_sql_query, OperationBuildError};
pub use loader::{load_semantic_operations, DescriptorCompletion, OperationDescriptor};
pub use sql::{sanitize_sql, SqlQuery, SqlQuerySettings};

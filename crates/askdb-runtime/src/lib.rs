//! askdb runtime
//!
//! Wires configuration, completion client, operations, planner, executor and
//! output formatter into a [`QueryService`].

mod bootstrap;
mod progress;
mod service;

pub use bootstrap::{BootstrapError, RuntimeApp, RuntimeOptions};
pub use progress::ChannelProgressReporter;
pub use service::{QueryError, QueryResponse, QueryService};

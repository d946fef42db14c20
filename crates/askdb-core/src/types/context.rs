//! ExecutionContext - per-run variable store
//!
//! One instance per plan execution. Seeded with the goal (and caller seeds),
//! then written only by the executor, one step at a time.

use std::collections::BTreeMap;

/// Context key pre-seeded with the goal text
pub const GOAL_KEY: &str = "goal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    execution_id: String,
    values: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Create a context seeded with the goal.
    pub fn new(goal: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(GOAL_KEY.to_string(), goal.into());
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            values,
        }
    }

    /// Add a caller-supplied seed variable.
    pub fn with_seed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub(crate) fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Keys currently present.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> BTreeMap<String, String> {
        self.values
    }
}

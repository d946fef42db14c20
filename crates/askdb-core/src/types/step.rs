//! Step type definitions
//!
//! A step invokes one operation, reading its parameters from context variables
//! (or literals) and writing its result to zero or more context keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::OperationRef;

/// Source of one operation parameter.
///
/// Wire form is a plain string: `$key` reads context variable `key`, `$$text`
/// is the literal `$text`, anything else is a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InputBinding {
    Variable(String),
    Literal(String),
}

impl InputBinding {
    pub fn variable(key: impl Into<String>) -> Self {
        Self::Variable(key.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn parse(raw: &str) -> Self {
        if let Some(escaped) = raw.strip_prefix("$$") {
            return Self::Literal(format!("${}", escaped));
        }
        match raw.strip_prefix('$') {
            Some(key) => Self::Variable(key.trim().to_string()),
            None => Self::Literal(raw.to_string()),
        }
    }

    /// Context key this binding reads, if any.
    pub fn variable_key(&self) -> Option<&str> {
        match self {
            Self::Variable(key) => Some(key),
            Self::Literal(_) => None,
        }
    }
}

impl From<String> for InputBinding {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for InputBinding {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<InputBinding> for String {
    fn from(binding: InputBinding) -> Self {
        binding.to_string()
    }
}

impl fmt::Display for InputBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(key) => write!(f, "${}", key),
            Self::Literal(value) if value.starts_with('$') => write!(f, "${}", value),
            Self::Literal(value) => f.write_str(value),
        }
    }
}

/// A single step in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Free-text rationale; also used to locate a step by description
    pub description: String,
    /// Operation to invoke
    pub operation: OperationRef,
    /// Parameter name -> source
    #[serde(default)]
    pub input_bindings: BTreeMap<String, InputBinding>,
    /// Context keys the result is written to
    #[serde(default)]
    pub output_keys: Vec<String>,
}

impl Step {
    pub fn new(description: impl Into<String>, operation: OperationRef) -> Self {
        Self {
            description: description.into(),
            operation,
            input_bindings: BTreeMap::new(),
            output_keys: Vec::new(),
        }
    }

    /// Bind a parameter
    pub fn with_input(mut self, parameter: impl Into<String>, binding: InputBinding) -> Self {
        self.input_bindings.insert(parameter.into(), binding);
        self
    }

    /// Add an output key
    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.output_keys.push(key.into());
        self
    }

    /// First output key, if the step has one.
    pub fn primary_output(&self) -> Option<&str> {
        self.output_keys.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_binding_parse_distinguishes_variables_and_literals() {
        assert_eq!(InputBinding::parse("$sql_text"), InputBinding::variable("sql_text"));
        assert_eq!(InputBinding::parse("TOP 10"), InputBinding::literal("TOP 10"));
        assert_eq!(InputBinding::parse("$$5.00"), InputBinding::literal("$5.00"));
        assert_eq!(InputBinding::literal("$5.00").to_string(), "$$5.00");
    }

    #[test]
    fn test_step_deserializes_bindings_from_strings() {
        let step: Step = serde_json::from_value(serde_json::json!({
            "description": "Run the generated query",
            "operation": {"namespace": "db", "name": "RunQuery"},
            "input_bindings": {"input": "$sql_text", "limit": "10"},
            "output_keys": ["result"]
        }))
        .expect("deserialize");

        assert_eq!(
            step.input_bindings.get("input"),
            Some(&InputBinding::variable("sql_text"))
        );
        assert_eq!(step.input_bindings.get("limit"), Some(&InputBinding::literal("10")));
        assert_eq!(step.primary_output(), Some("result"));
    }
}

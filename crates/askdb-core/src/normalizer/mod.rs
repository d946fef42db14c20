//! Plan normalizer
//!
//! Every plan passes through here before it is handed to the executor:
//! - Fixers repair harmless formatting slips (stray whitespace, `$` on output keys)
//! - Built-in validation checks operations, parameters and causal ordering
//! - Custom validators add deployment-specific rules
//!
//! An invalid plan is rejected whole; nothing downstream ever sees it.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::operation::OperationRef;
use crate::registry::OperationRegistry;
use crate::types::{InputBinding, Plan};

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Empty plan")]
    EmptyPlan,

    #[error("step {step_index}: unknown operation '{operation}'")]
    UnknownOperation {
        step_index: usize,
        operation: OperationRef,
    },

    #[error("step {step_index}: operation '{operation}' has no parameter '{parameter}'")]
    UnknownParameter {
        step_index: usize,
        operation: OperationRef,
        parameter: String,
    },

    #[error("step {step_index}: required parameter '{parameter}' of '{operation}' is not bound")]
    MissingParameter {
        step_index: usize,
        operation: OperationRef,
        parameter: String,
    },

    #[error("step {step_index}: empty output key")]
    EmptyOutputKey { step_index: usize },

    #[error("step {step_index}: output key '{key}' declared twice")]
    DuplicateOutputKey { step_index: usize, key: String },

    #[error(
        "step {step_index}: parameter '{parameter}' reads '${key}', which no earlier step or seed provides"
    )]
    UnresolvedVariable {
        step_index: usize,
        parameter: String,
        key: String,
    },
}

impl ValidationError {
    /// Index of the offending step, when the error is tied to one.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::EmptyPlan => None,
            Self::UnknownOperation { step_index, .. }
            | Self::UnknownParameter { step_index, .. }
            | Self::MissingParameter { step_index, .. }
            | Self::EmptyOutputKey { step_index }
            | Self::DuplicateOutputKey { step_index, .. }
            | Self::UnresolvedVariable { step_index, .. } => Some(*step_index),
        }
    }
}

/// Plan validator trait
pub trait PlanValidator: Send + Sync {
    fn validate(&self, plan: &Plan, registry: &OperationRegistry) -> Result<(), ValidationError>;
}

/// Plan fixer trait
pub trait PlanFixer: Send + Sync {
    /// Attempt to fix a plan. Returns true if anything changed.
    fn fix(&self, plan: &mut Plan) -> bool;
}

/// Trims whitespace from parameter names, variable keys and output keys.
pub struct TrimKeysFixer;

impl PlanFixer for TrimKeysFixer {
    fn fix(&self, plan: &mut Plan) -> bool {
        let mut changed = false;
        for step in &mut plan.steps {
            let bindings = std::mem::take(&mut step.input_bindings);
            for (parameter, binding) in bindings {
                let trimmed = parameter.trim().to_string();
                let binding = match binding {
                    InputBinding::Variable(key) if key.trim() != key => {
                        changed = true;
                        InputBinding::Variable(key.trim().to_string())
                    }
                    other => other,
                };
                changed |= trimmed != parameter;
                step.input_bindings.insert(trimmed, binding);
            }
            for key in &mut step.output_keys {
                if key.trim() != key.as_str() {
                    *key = key.trim().to_string();
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Strips a leading `$` from output keys (`"$sql_text"` -> `"sql_text"`).
pub struct OutputSigilFixer;

impl PlanFixer for OutputSigilFixer {
    fn fix(&self, plan: &mut Plan) -> bool {
        let mut changed = false;
        for key in plan.steps.iter_mut().flat_map(|s| s.output_keys.iter_mut()) {
            if let Some(stripped) = key.strip_prefix('$') {
                *key = stripped.trim().to_string();
                changed = true;
            }
        }
        changed
    }
}

/// Plan normalizer
pub struct PlanNormalizer {
    fixers: Vec<Box<dyn PlanFixer>>,
    validators: Vec<Box<dyn PlanValidator>>,
}

impl Default for PlanNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanNormalizer {
    /// Normalizer with the built-in fixers
    pub fn new() -> Self {
        Self {
            fixers: vec![Box::new(TrimKeysFixer), Box::new(OutputSigilFixer)],
            validators: Vec::new(),
        }
    }

    pub fn add_fixer(&mut self, fixer: Box<dyn PlanFixer>) {
        self.fixers.push(fixer);
    }

    pub fn add_validator(&mut self, validator: Box<dyn PlanValidator>) {
        self.validators.push(validator);
    }

    /// Fix, then validate. `seed_keys` are the context keys present before step 0.
    pub fn normalize<S: AsRef<str>>(
        &self,
        mut plan: Plan,
        registry: &OperationRegistry,
        seed_keys: &[S],
    ) -> Result<Plan, ValidationError> {
        for fixer in &self.fixers {
            if fixer.fix(&mut plan) {
                tracing::debug!("plan normalizer applied fix");
            }
        }

        validate_plan(&plan, registry, seed_keys)?;
        for validator in &self.validators {
            validator.validate(&plan, registry)?;
        }
        Ok(plan)
    }
}

/// Built-in validation: operations exist, parameters match their declarations,
/// output keys are well formed, and every variable is produced before it is read.
pub fn validate_plan<S: AsRef<str>>(
    plan: &Plan,
    registry: &OperationRegistry,
    seed_keys: &[S],
) -> Result<(), ValidationError> {
    if plan.steps.is_empty() {
        return Err(ValidationError::EmptyPlan);
    }

    let mut available: BTreeSet<&str> = seed_keys.iter().map(AsRef::as_ref).collect();
    for (step_index, step) in plan.steps.iter().enumerate() {
        let operation = registry.get(&step.operation).map_err(|_| {
            ValidationError::UnknownOperation {
                step_index,
                operation: step.operation.clone(),
            }
        })?;
        let meta = operation.metadata();

        for (parameter, binding) in &step.input_bindings {
            if meta.parameter(parameter).is_none() {
                return Err(ValidationError::UnknownParameter {
                    step_index,
                    operation: step.operation.clone(),
                    parameter: parameter.clone(),
                });
            }
            if let Some(key) = binding.variable_key() {
                if !available.contains(key) {
                    return Err(ValidationError::UnresolvedVariable {
                        step_index,
                        parameter: parameter.clone(),
                        key: key.to_string(),
                    });
                }
            }
        }

        if let Some(missing) = meta
            .parameters
            .iter()
            .find(|p| p.is_required() && !step.input_bindings.contains_key(&p.name))
        {
            return Err(ValidationError::MissingParameter {
                step_index,
                operation: step.operation.clone(),
                parameter: missing.name.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for key in &step.output_keys {
            if key.is_empty() {
                return Err(ValidationError::EmptyOutputKey { step_index });
            }
            if !seen.insert(key.as_str()) {
                return Err(ValidationError::DuplicateOutputKey {
                    step_index,
                    key: key.clone(),
                });
            }
        }
        // Outputs become visible only to later steps.
        available.extend(step.output_keys.iter().map(String::as_str));
    }
    Ok(())
}

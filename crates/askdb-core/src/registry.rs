//! Operation registry
//!
//! Filled once at session start, then shared read-only (`Arc<OperationRegistry>`)
//! between the planner and the executor so both observe the same operation set.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::operation::{Operation, OperationMeta, OperationRef};

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("operation '{0}' is already registered")]
    DuplicateOperation(OperationRef),

    #[error("operation '{0}' not found")]
    OperationNotFound(OperationRef),
}

/// Registry for looking up operations by `(namespace, name)`
#[derive(Default)]
pub struct OperationRegistry {
    operations: BTreeMap<OperationRef, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation
    pub fn register(&mut self, operation: Arc<dyn Operation>) -> Result<(), RegistryError> {
        let reference = operation.reference().clone();
        if self.operations.contains_key(&reference) {
            return Err(RegistryError::DuplicateOperation(reference));
        }
        tracing::debug!(
            operation = %reference,
            kind = %operation.metadata().kind,
            "operation registered"
        );
        self.operations.insert(reference, operation);
        Ok(())
    }

    /// Look up an operation
    pub fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<dyn Operation>, RegistryError> {
        self.get(&OperationRef::new(namespace, name))
    }

    /// Look up an operation by reference
    pub fn get(&self, reference: &OperationRef) -> Result<Arc<dyn Operation>, RegistryError> {
        self.operations
            .get(reference)
            .cloned()
            .ok_or_else(|| RegistryError::OperationNotFound(reference.clone()))
    }

    pub fn contains(&self, reference: &OperationRef) -> bool {
        self.operations.contains_key(reference)
    }

    /// Metadata of every registered operation, ordered by reference.
    pub fn catalog(&self) -> Vec<OperationMeta> {
        self.operations
            .values()
            .map(|operation| operation.metadata().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

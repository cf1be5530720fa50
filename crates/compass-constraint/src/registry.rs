//! Operator registry — maps operator kinds to their implementations.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{ConstraintError, ConstraintResult};
use crate::operator::{self, Decision, OperatorKind};

/// Signature every operator implements.
pub type OperatorFn = fn(&Value) -> ConstraintResult<Decision>;

/// Registered operators, populated once at startup.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    operators: HashMap<OperatorKind, OperatorFn>,
}

impl OperatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// A registry holding every built-in operator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            OperatorKind::IsNotAssignedToAnyFormationOfType,
            operator::is_not_assigned_to_any_formation_of_type,
        );
        registry.register(
            OperatorKind::DoesNotContainResourceOfSubtype,
            operator::does_not_contain_resource_of_subtype,
        );
        registry.register(
            OperatorKind::DoNotGenerateFormationAssignmentNotification,
            operator::do_not_generate_notification,
        );
        registry.register(
            OperatorKind::DoNotGenerateFormationAssignmentNotificationForLoops,
            operator::do_not_generate_notification_for_loops,
        );
        registry
    }

    /// Register (or replace) an operator implementation.
    pub fn register(&mut self, kind: OperatorKind, f: OperatorFn) {
        self.operators.insert(kind, f);
    }

    /// Run the operator registered for `kind`.
    pub fn invoke(&self, kind: OperatorKind, input: &Value) -> ConstraintResult<Decision> {
        let f = self
            .operators
            .get(&kind)
            .ok_or_else(|| ConstraintError::UnknownOperator(kind.to_string()))?;
        f(input)
    }

    pub fn contains(&self, kind: OperatorKind) -> bool {
        self.operators.contains_key(&kind)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

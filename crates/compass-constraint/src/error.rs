//! Error types for constraint evaluation and management

use compass_state::StateError;
use compass_template::TemplateError;

/// Constraint errors
#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    /// The constraint names an operator that is not registered.
    #[error("unknown constraint operator: {0}")]
    UnknownOperator(String),

    /// The rendered input does not match what the operator expects.
    #[error("invalid input for operator {operator}: {message}")]
    InvalidInput { operator: String, message: String },

    #[error("constraint not found: {0}")]
    NotFound(String),

    /// Field-qualified validation failure, e.g. `name=cannot be blank`.
    #[error("{0}")]
    Validation(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

/// Result type for constraint operations
pub type ConstraintResult<T> = Result<T, ConstraintError>;

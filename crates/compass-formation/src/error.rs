//! Formation orchestrator error types.

use compass_constraint::ConstraintError;
use compass_state::StateError;
use compass_template::TemplateError;
use thiserror::Error;

/// Errors returned by formation operations.
///
/// Webhook failures are not here: they are recorded on the affected
/// assignment and surface through the formation status.
#[derive(Debug, Error)]
pub enum FormationError {
    /// Field-qualified validation failure, e.g. `name=cannot be blank`.
    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("operation denied by formation constraint: {0}")]
    ConstraintDenied(String),

    /// The mutation is blocked by records that must be removed first.
    #[error("{0}")]
    Conflict(String),

    #[error("caller {caller} is not authorized to report status for assignment {assignment}")]
    CallbackUnauthorized { caller: String, assignment: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("constraint error: {0}")]
    Constraint(#[from] ConstraintError),
}

impl FormationError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type FormationResult<T> = Result<T, FormationError>;

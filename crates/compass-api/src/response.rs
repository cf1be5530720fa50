//! Response envelope and error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use compass_constraint::ConstraintError;
use compass_formation::FormationError;
use tracing::error;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub(crate) fn formation_error(e: &FormationError) -> Response {
    let status = match e {
        FormationError::Validation(_)
        | FormationError::Template(_)
        | FormationError::ConstraintDenied(_)
        | FormationError::Unsupported(_) => StatusCode::BAD_REQUEST,
        FormationError::CallbackUnauthorized { .. } | FormationError::Forbidden(_) => StatusCode::FORBIDDEN,
        FormationError::NotFound { .. } => StatusCode::NOT_FOUND,
        FormationError::AlreadyExists(_) | FormationError::Conflict(_) => StatusCode::CONFLICT,
        FormationError::Constraint(inner) => return constraint_error(inner),
        FormationError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "request failed");
    }
    error_response(&e.to_string(), status)
}

pub(crate) fn constraint_error(e: &ConstraintError) -> Response {
    let status = match e {
        ConstraintError::NotFound(_) => StatusCode::NOT_FOUND,
        ConstraintError::UnknownOperator(_)
        | ConstraintError::InvalidInput { .. }
        | ConstraintError::Validation(_)
        | ConstraintError::Template(_) => StatusCode::BAD_REQUEST,
        ConstraintError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "request failed");
    }
    error_response(&e.to_string(), status)
}

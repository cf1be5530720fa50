//! Formation constraint handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use compass_constraint::{ConstraintInput, ConstraintUpdate};

use crate::ApiState;
use crate::response::{ApiResponse, constraint_error, formation_error};

/// GET /api/v1/constraints
pub async fn list_constraints(State(state): State<ApiState>) -> impl IntoResponse {
    match state.constraints.list() {
        Ok(constraints) => ApiResponse::ok(constraints).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// POST /api/v1/constraints
pub async fn create_constraint(
    State(state): State<ApiState>,
    Json(input): Json<ConstraintInput>,
) -> impl IntoResponse {
    match state.constraints.create(input) {
        Ok(constraint) => (StatusCode::CREATED, ApiResponse::ok(constraint)).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// GET /api/v1/constraints/:id
pub async fn get_constraint(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.constraints.get(&id) {
        Ok(constraint) => ApiResponse::ok(constraint).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// PATCH /api/v1/constraints/:id
pub async fn update_constraint(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<ConstraintUpdate>,
) -> impl IntoResponse {
    match state.constraints.update(&id, update) {
        Ok(constraint) => ApiResponse::ok(constraint).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// DELETE /api/v1/constraints/:id
pub async fn delete_constraint(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.constraints.delete(&id) {
        Ok(constraint) => ApiResponse::ok(constraint).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// GET /api/v1/formation-templates/:id/constraints
pub async fn list_template_constraints(
    State(state): State<ApiState>,
    Path(template_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.orchestrator.get_formation_template(&template_id) {
        return formation_error(&e);
    }
    match state.constraints.list_for_template(&template_id) {
        Ok(constraints) => ApiResponse::ok(constraints).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// POST /api/v1/formation-templates/:id/constraints/:constraint_id
pub async fn attach_constraint(
    State(state): State<ApiState>,
    Path((template_id, constraint_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if let Err(e) = state.orchestrator.get_formation_template(&template_id) {
        return formation_error(&e);
    }
    match state.constraints.attach(&constraint_id, &template_id) {
        Ok(attachment) => (StatusCode::CREATED, ApiResponse::ok(attachment)).into_response(),
        Err(e) => constraint_error(&e),
    }
}

/// DELETE /api/v1/formation-templates/:id/constraints/:constraint_id
pub async fn detach_constraint(
    State(state): State<ApiState>,
    Path((template_id, constraint_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.constraints.detach(&constraint_id, &template_id) {
        Ok(()) => ApiResponse::ok("detached").into_response(),
        Err(e) => constraint_error(&e),
    }
}

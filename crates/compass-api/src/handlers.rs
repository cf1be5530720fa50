//! Formation handlers: lifecycle, membership, status, resync and the
//! asynchronous status callback.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use compass_formation::{AssignRequest, StatusReport, UnassignRequest};

use crate::ApiState;
use crate::extract::{Consumer, TenantCaller};
use crate::response::{ApiResponse, formation_error};

// ── Formations ─────────────────────────────────────────────────

/// Create request body.
#[derive(serde::Deserialize)]
pub struct CreateFormationRequest {
    pub name: String,
    /// Formation template ID or name.
    pub formation_template: String,
}

/// GET /api/v1/formations
pub async fn list_formations(State(state): State<ApiState>, TenantCaller(caller): TenantCaller) -> impl IntoResponse {
    match state.orchestrator.list_formations(&caller) {
        Ok(formations) => ApiResponse::ok(formations).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// POST /api/v1/formations
pub async fn create_formation(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Json(req): Json<CreateFormationRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .create_formation(&caller, &req.name, &req.formation_template)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// GET /api/v1/formations/:id
pub async fn get_formation(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get_formation(&caller, &id) {
        Ok(formation) => ApiResponse::ok(formation).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// DELETE /api/v1/formations/:id
pub async fn delete_formation(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let formation = match state.orchestrator.get_formation(&caller, &id) {
        Ok(formation) => formation,
        Err(e) => return formation_error(&e),
    };
    match state.orchestrator.delete_formation(&caller, &formation.name).await {
        Ok(outcome) if outcome.deleted => ApiResponse::ok(outcome).into_response(),
        // The lifecycle webhook refused; the formation stays in DELETE_ERROR.
        Ok(outcome) => (StatusCode::ACCEPTED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// GET /api/v1/formations/:id/status
pub async fn formation_status(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.formation_status(&caller, &id) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// GET /api/v1/formations/:id/assignments
pub async fn list_assignments(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.list_assignments(&caller, &id) {
        Ok(assignments) => ApiResponse::ok(assignments).into_response(),
        Err(e) => formation_error(&e),
    }
}

// ── Membership ─────────────────────────────────────────────────

/// POST /api/v1/formations/assign
pub async fn assign_formation(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Json(req): Json<AssignRequest>,
) -> impl IntoResponse {
    match state.orchestrator.assign(&caller, &req).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// POST /api/v1/formations/unassign
pub async fn unassign_formation(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Json(req): Json<UnassignRequest>,
) -> impl IntoResponse {
    match state.orchestrator.unassign(&caller, &req).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => formation_error(&e),
    }
}

// ── Resync ─────────────────────────────────────────────────────

#[derive(Default, serde::Deserialize)]
pub struct ResyncRequest {
    #[serde(default)]
    pub reset: bool,
}

/// POST /api/v1/formations/:id/resync
pub async fn resync_formation(
    State(state): State<ApiState>,
    TenantCaller(caller): TenantCaller,
    Path(id): Path<String>,
    body: Option<Json<ResyncRequest>>,
) -> impl IntoResponse {
    let Json(req) = body.unwrap_or_default();
    match state.orchestrator.resync(&caller, &id, req.reset).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => formation_error(&e),
    }
}

// ── Status callback ────────────────────────────────────────────

/// POST /v1/businessIntegrations/:formation_id/assignments/:assignment_id/status
pub async fn assignment_status(
    State(state): State<ApiState>,
    Consumer(consumer): Consumer,
    Path((formation_id, assignment_id)): Path<(String, String)>,
    Json(report): Json<StatusReport>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .update_assignment_status(&formation_id, &assignment_id, consumer.as_deref(), report)
        .await
    {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => formation_error(&e),
    }
}

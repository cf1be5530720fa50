//! Registration handlers: formation templates, application templates,
//! participants and webhooks.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use compass_state::{ApplicationTemplate, FormationTemplate, ObjectType, Participant, Webhook};

use crate::ApiState;
use crate::response::{ApiResponse, error_response, formation_error};

// ── Formation templates ────────────────────────────────────────

/// GET /api/v1/formation-templates
pub async fn list_formation_templates(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.list_formation_templates() {
        Ok(templates) => ApiResponse::ok(templates).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// POST /api/v1/formation-templates
pub async fn register_formation_template(
    State(state): State<ApiState>,
    Json(template): Json<FormationTemplate>,
) -> impl IntoResponse {
    match state.orchestrator.register_formation_template(template) {
        Ok(template) => (StatusCode::CREATED, ApiResponse::ok(template)).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// GET /api/v1/formation-templates/:id
pub async fn get_formation_template(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.get_formation_template(&id) {
        Ok(template) => ApiResponse::ok(template).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// DELETE /api/v1/formation-templates/:id
pub async fn delete_formation_template(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.delete_formation_template(&id) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => formation_error(&e),
    }
}

// ── Application templates ──────────────────────────────────────

/// POST /api/v1/application-templates
pub async fn register_application_template(
    State(state): State<ApiState>,
    Json(template): Json<ApplicationTemplate>,
) -> impl IntoResponse {
    match state.orchestrator.register_application_template(template) {
        Ok(template) => (StatusCode::CREATED, ApiResponse::ok(template)).into_response(),
        Err(e) => formation_error(&e),
    }
}

// ── Participants ───────────────────────────────────────────────

fn object_type(raw: &str) -> Result<ObjectType, axum::response::Response> {
    raw.replace('-', "_")
        .parse()
        .map_err(|e: String| error_response(&format!("objectType={e}"), StatusCode::BAD_REQUEST))
}

/// GET /api/v1/participants/:type
pub async fn list_participants(State(state): State<ApiState>, Path(kind): Path<String>) -> impl IntoResponse {
    let object_type = match object_type(&kind) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match state.orchestrator.list_participants(object_type) {
        Ok(participants) => ApiResponse::ok(participants).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// POST /api/v1/participants
pub async fn register_participant(
    State(state): State<ApiState>,
    Json(participant): Json<Participant>,
) -> impl IntoResponse {
    match state.orchestrator.register_participant(participant) {
        Ok(participant) => (StatusCode::CREATED, ApiResponse::ok(participant)).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// GET /api/v1/participants/:type/:id
pub async fn get_participant(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> impl IntoResponse {
    let object_type = match object_type(&kind) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match state.orchestrator.get_participant(object_type, &id) {
        Ok(participant) => ApiResponse::ok(participant).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// DELETE /api/v1/participants/:type/:id
pub async fn delete_participant(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> impl IntoResponse {
    let object_type = match object_type(&kind) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match state.orchestrator.delete_participant(object_type, &id) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => formation_error(&e),
    }
}

// ── Webhooks ───────────────────────────────────────────────────

/// POST /api/v1/webhooks
pub async fn register_webhook(State(state): State<ApiState>, Json(webhook): Json<Webhook>) -> impl IntoResponse {
    match state.orchestrator.register_webhook(webhook) {
        Ok(webhook) => (StatusCode::CREATED, ApiResponse::ok(webhook)).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// GET /api/v1/webhooks/:owner_id
pub async fn list_webhooks(State(state): State<ApiState>, Path(owner_id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.list_webhooks(&owner_id) {
        Ok(webhooks) => ApiResponse::ok(webhooks).into_response(),
        Err(e) => formation_error(&e),
    }
}

/// DELETE /api/v1/webhooks/:owner_id/:id
pub async fn delete_webhook(
    State(state): State<ApiState>,
    Path((owner_id, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.orchestrator.delete_webhook(&owner_id, &id) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => formation_error(&e),
    }
}

//! compass-api — REST API for Compass formations.
//!
//! Provides axum route handlers for formations, memberships, constraints,
//! registrations and the asynchronous status callback. Tenant-scoped routes
//! require the `x-tenant-id` header.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/formations` | List the tenant's formations |
//! | POST | `/api/v1/formations` | Create a formation |
//! | POST | `/api/v1/formations/assign` | Assign an object to a formation |
//! | POST | `/api/v1/formations/unassign` | Unassign an object from a formation |
//! | GET | `/api/v1/formations/:id` | Get formation details |
//! | DELETE | `/api/v1/formations/:id` | Delete an empty formation |
//! | GET | `/api/v1/formations/:id/status` | Aggregate status with errors |
//! | GET | `/api/v1/formations/:id/assignments` | List assignments |
//! | POST | `/api/v1/formations/:id/resync` | Resend failed notifications |
//! | GET/POST | `/api/v1/constraints` | List or create constraints |
//! | GET/PATCH/DELETE | `/api/v1/constraints/:id` | Manage a constraint |
//! | GET/POST | `/api/v1/formation-templates` | List or register templates |
//! | GET/DELETE | `/api/v1/formation-templates/:id` | Manage a template |
//! | GET | `/api/v1/formation-templates/:id/constraints` | Attached constraints |
//! | POST/DELETE | `/api/v1/formation-templates/:id/constraints/:cid` | Attach or detach |
//! | POST | `/api/v1/application-templates` | Register an application template |
//! | POST | `/api/v1/participants` | Register a participant |
//! | GET | `/api/v1/participants/:type` | List participants of a type |
//! | GET/DELETE | `/api/v1/participants/:type/:id` | Manage a participant |
//! | POST | `/api/v1/webhooks` | Register a webhook |
//! | GET | `/api/v1/webhooks/:owner` | List an owner's webhooks |
//! | DELETE | `/api/v1/webhooks/:owner/:id` | Delete a webhook |
//! | POST | `/v1/businessIntegrations/:fid/assignments/:aid/status` | Status callback |

pub mod constraint_handlers;
pub mod extract;
pub mod handlers;
pub mod registry_handlers;
mod response;

use axum::Router;
use axum::routing::{get, post};
use compass_constraint::ConstraintCatalog;
use compass_formation::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Orchestrator,
    pub constraints: ConstraintCatalog,
}

impl ApiState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let constraints = ConstraintCatalog::new(orchestrator.store().clone());
        Self {
            orchestrator,
            constraints,
        }
    }
}

/// Build the complete API router (REST + status callback).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/formations", get(handlers::list_formations).post(handlers::create_formation))
        .route("/formations/assign", post(handlers::assign_formation))
        .route("/formations/unassign", post(handlers::unassign_formation))
        .route("/formations/{id}", get(handlers::get_formation).delete(handlers::delete_formation))
        .route("/formations/{id}/status", get(handlers::formation_status))
        .route("/formations/{id}/assignments", get(handlers::list_assignments))
        .route("/formations/{id}/resync", post(handlers::resync_formation))
        .route(
            "/constraints",
            get(constraint_handlers::list_constraints).post(constraint_handlers::create_constraint),
        )
        .route(
            "/constraints/{id}",
            get(constraint_handlers::get_constraint)
                .patch(constraint_handlers::update_constraint)
                .delete(constraint_handlers::delete_constraint),
        )
        .route(
            "/formation-templates",
            get(registry_handlers::list_formation_templates).post(registry_handlers::register_formation_template),
        )
        .route(
            "/formation-templates/{id}",
            get(registry_handlers::get_formation_template).delete(registry_handlers::delete_formation_template),
        )
        .route(
            "/formation-templates/{id}/constraints",
            get(constraint_handlers::list_template_constraints),
        )
        .route(
            "/formation-templates/{id}/constraints/{constraint_id}",
            post(constraint_handlers::attach_constraint).delete(constraint_handlers::detach_constraint),
        )
        .route(
            "/application-templates",
            post(registry_handlers::register_application_template),
        )
        .route("/participants", post(registry_handlers::register_participant))
        .route("/participants/{kind}", get(registry_handlers::list_participants))
        .route(
            "/participants/{kind}/{id}",
            get(registry_handlers::get_participant).delete(registry_handlers::delete_participant),
        )
        .route("/webhooks", post(registry_handlers::register_webhook))
        .route("/webhooks/{owner_id}", get(registry_handlers::list_webhooks))
        .route("/webhooks/{owner_id}/{id}", axum::routing::delete(registry_handlers::delete_webhook));

    Router::new()
        .nest("/api/v1", api_routes)
        .route(
            "/v1/businessIntegrations/{formation_id}/assignments/{assignment_id}/status",
            post(handlers::assignment_status),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use compass_constraint::{ConstraintEngine, OperatorRegistry};
    use compass_core::ConsumerConfig;
    use compass_formation::{ConsumerDirectory, OrchestratorConfig};
    use compass_notify::{
        BoxFuture, Dispatcher, NotifyResult, RetryPolicy, WebhookRequest, WebhookResponse, WebhookTransport,
    };
    use compass_state::StateStore;
    use compass_template::TemplateCache;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const TENANT: &str = "tenant-a";
    const CONSUMER: &str = "CN=rt-y-operator";

    const SYNC_OUTPUT: &str = r#"{"config": {{ json (default null .Body.configuration) }}, "state": "{{ .Body.state | default "" }}", "success_status_code": 200, "incomplete_status_code": 204}"#;

    /// Runtime `rt-y` acknowledges asynchronously; everything else answers 200 `{}`.
    struct StubTarget;

    impl WebhookTransport for StubTarget {
        fn send<'a>(&'a self, request: &'a WebhookRequest) -> BoxFuture<'a, NotifyResult<WebhookResponse>> {
            let (status, body) = if request.url.starts_with("http://rt-y.test") {
                (202, String::new())
            } else {
                (200, "{}".to_string())
            };
            Box::pin(async move {
                Ok(WebhookResponse {
                    status,
                    headers: BTreeMap::new(),
                    body,
                })
            })
        }
    }

    fn test_router() -> Router {
        let store = StateStore::open_in_memory().unwrap();
        let templates = Arc::new(TemplateCache::new());
        let dispatcher = Dispatcher::new(Arc::new(StubTarget), templates.clone(), RetryPolicy::none());
        let engine = ConstraintEngine::new(store.clone(), OperatorRegistry::with_defaults(), templates);
        let consumers = ConsumerDirectory::new(vec![ConsumerConfig {
            id: CONSUMER.into(),
            object_ids: vec!["rt-y".into()],
            tenant_ids: vec![],
        }]);
        let config = OrchestratorConfig {
            notification_timeout: Duration::from_secs(5),
        };
        let orchestrator = Orchestrator::new(store, engine, dispatcher, consumers, config);
        build_router(ApiState::new(orchestrator))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", TENANT);
        let body = match body {
            Some(value) => {
                req = req.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };
        let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn webhook(owner: &str, owner_type: &str, mode: &str, output: &str) -> Value {
        json!({
            "id": format!("wh-{owner}"),
            "owner_id": owner,
            "owner_type": owner_type,
            "webhook_type": "CONFIGURATION_CHANGED",
            "mode": mode,
            "url_template": format!(r#"{{"method": "PATCH", "path": "http://{owner}.test/formations/{{{{ .FormationID }}}}"}}"#),
            "input_template": r#"{"operation": "{{ .Operation }}"}"#,
            "output_template": output,
        })
    }

    /// Registers the side-by-side template, `app-x` (sync) and `rt-y` (async).
    async fn seed(router: &Router) {
        let (status, _) = send(
            router,
            "POST",
            "/api/v1/formation-templates",
            Some(json!({
                "id": "tpl-sbs",
                "name": "side-by-side",
                "application_types": ["crm"],
                "runtime_types": ["kyma"],
                "supports_reset": true,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        for (id, object_type, subtype) in [("app-x", "APPLICATION", "crm"), ("rt-y", "RUNTIME", "kyma")] {
            let (status, _) = send(
                router,
                "POST",
                "/api/v1/participants",
                Some(json!({"id": id, "object_type": object_type, "name": id, "subtype": subtype})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let hooks = [
            webhook("app-x", "APPLICATION", "SYNC", SYNC_OUTPUT),
            webhook("rt-y", "RUNTIME", "ASYNC", r#"{"success_status_code": 202}"#),
        ];
        for hook in hooks {
            let (status, body) = send(router, "POST", "/api/v1/webhooks", Some(hook)).await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }
    }

    async fn assign(router: &Router, object_id: &str, object_type: &str) -> Value {
        let (status, body) = send(
            router,
            "POST",
            "/api/v1/formations/assign",
            Some(json!({
                "object_id": object_id,
                "object_type": object_type,
                "formation_name": "alpha",
                "formation_template": "side-by-side",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    #[tokio::test]
    async fn tenant_header_is_required() {
        let router = test_router();
        let req = Request::builder().uri("/api/v1/formations").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_and_get_formation() {
        let router = test_router();
        seed(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/formations",
            Some(json!({"name": "beta", "formation_template": "side-by-side"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        let id = body["data"]["formation"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&router, "GET", &format!("/api/v1/formations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "beta");

        let (status, body) = send(&router, "GET", "/api/v1/formations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        // Empty formations can be deleted.
        let (status, body) = send(&router, "DELETE", &format!("/api/v1/formations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["deleted"], true);
    }

    #[tokio::test]
    async fn unknown_formation_is_not_found() {
        let router = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/formations/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn async_target_completes_through_callback() {
        let router = test_router();
        seed(&router).await;
        assign(&router, "app-x", "APPLICATION").await;
        let body = assign(&router, "rt-y", "RUNTIME").await;
        let formation_id = body["data"]["formation"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            "GET",
            &format!("/api/v1/formations/{formation_id}/assignments"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let pending = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["source"] == "app-x" && a["target"] == "rt-y")
            .unwrap()
            .clone();
        assert_eq!(pending["state"], "CONFIG_PENDING");
        let callback = format!(
            "/v1/businessIntegrations/{formation_id}/assignments/{}/status",
            pending["id"].as_str().unwrap()
        );

        // No consumer identity: refused.
        let (status, _) = send(&router, "POST", &callback, Some(json!({"state": "READY"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let req = Request::builder()
            .method("POST")
            .uri(&callback)
            .header("x-consumer-id", CONSUMER)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"state": "READY"}"#))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (status, body) = send(&router, "GET", &format!("/api/v1/formations/{formation_id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["condition"], "READY");
    }

    #[tokio::test]
    async fn formation_with_members_cannot_be_deleted() {
        let router = test_router();
        seed(&router).await;
        let body = assign(&router, "app-x", "APPLICATION").await;
        let formation_id = body["data"]["formation"]["id"].as_str().unwrap();

        let (status, body) = send(&router, "DELETE", &format!("/api/v1/formations/{formation_id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        // Nor can the participant.
        let (status, _) = send(&router, "DELETE", "/api/v1/participants/application/app-x", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn constraint_lifecycle() {
        let router = test_router();
        seed(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/constraints",
            Some(json!({
                "name": "one-crm-formation",
                "constraint_type": "PRE",
                "target_operation": "ASSIGN_FORMATION",
                "operator": "IsNotAssignedToAnyFormationOfType",
                "resource_type": "APPLICATION",
                "resource_subtype": "crm",
                "constraint_scope": "FORMATION_TYPE",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &router,
            "POST",
            &format!("/api/v1/formation-templates/tpl-sbs/constraints/{id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&router, "GET", "/api/v1/formation-templates/tpl-sbs/constraints", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], id.as_str());

        let (status, body) = send(
            &router,
            "PATCH",
            &format!("/api/v1/constraints/{id}"),
            Some(json!({"name": "renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "renamed");

        let (status, _) = send(
            &router,
            "DELETE",
            &format!("/api/v1/formation-templates/tpl-sbs/constraints/{id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, "DELETE", &format!("/api/v1/constraints/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&router, "GET", &format!("/api/v1/constraints/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_operator_is_rejected() {
        let router = test_router();
        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/constraints",
            Some(json!({
                "name": "bogus",
                "constraint_type": "PRE",
                "target_operation": "ASSIGN_FORMATION",
                "operator": "NoSuchOperator",
                "resource_type": "APPLICATION",
                "resource_subtype": "*",
                "constraint_scope": "GLOBAL",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn bad_participant_type_is_rejected() {
        let router = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/participants/widget", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("objectType="));

        let (status, _) = send(&router, "GET", "/api/v1/participants/runtime-context", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

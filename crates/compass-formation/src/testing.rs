//! Shared fixtures for orchestrator tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use compass_constraint::{ConstraintCatalog, ConstraintEngine, OperatorRegistry};
use compass_core::ConsumerConfig;
use compass_notify::{
    BoxFuture, Dispatcher, NotifyResult, RetryPolicy, WebhookRequest, WebhookResponse,
    WebhookTransport,
};
use compass_state::*;
use compass_template::TemplateCache;

use crate::authz::{Caller, ConsumerDirectory};
use crate::orchestrator::{AssignRequest, Orchestrator, OrchestratorConfig, UnassignRequest};

pub const TENANT: &str = "tenant-a";
pub const TEMPLATE_ID: &str = "tpl-sbs";
pub const TEMPLATE_NAME: &str = "side-by-side";
pub const CONSUMER: &str = "CN=rt-y-operator";

pub const OUTPUT: &str = r#"{"config": {{ json (default null .Body.configuration) }}, "state": "{{ .Body.state | default "" }}", "error": "{{ .Body.error | default "" }}", "success_status_code": 200, "incomplete_status_code": 204}"#;

/// Fake webhook target. Answers by longest matching URL prefix, 200 `{}`
/// otherwise, and records every request.
#[derive(Default)]
pub struct FakeTarget {
    responses: Mutex<BTreeMap<String, (u16, String)>>,
    requests: Mutex<Vec<WebhookRequest>>,
}

impl FakeTarget {
    pub fn respond(&self, url_prefix: &str, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url_prefix.to_string(), (status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, pred: impl Fn(&WebhookRequest) -> bool) -> Vec<WebhookRequest> {
        self.requests().into_iter().filter(|r| pred(r)).collect()
    }

    fn answer(&self, url: &str) -> (u16, String) {
        self.responses
            .lock()
            .unwrap()
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| (200, "{}".to_string()))
    }
}

impl WebhookTransport for FakeTarget {
    fn send<'a>(&'a self, request: &'a WebhookRequest) -> BoxFuture<'a, NotifyResult<WebhookResponse>> {
        self.requests.lock().unwrap().push(request.clone());
        let (status, body) = self.answer(&request.url);
        Box::pin(async move {
            Ok(WebhookResponse {
                status,
                headers: BTreeMap::new(),
                body,
            })
        })
    }
}

pub struct Fixture {
    pub orchestrator: Orchestrator,
    pub target: Arc<FakeTarget>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_leading_products(Vec::new())
    }

    pub fn with_leading_products(leading_product_ids: Vec<String>) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let templates = Arc::new(TemplateCache::new());
        let target = Arc::new(FakeTarget::default());
        let dispatcher = Dispatcher::new(target.clone(), templates.clone(), RetryPolicy::none());
        let constraints = ConstraintEngine::new(store.clone(), OperatorRegistry::with_defaults(), templates);
        let consumers = ConsumerDirectory::new(vec![ConsumerConfig {
            id: CONSUMER.into(),
            object_ids: vec!["rt-y".into()],
            tenant_ids: vec![],
        }]);
        let config = OrchestratorConfig {
            notification_timeout: Duration::from_secs(5),
        };
        let orchestrator = Orchestrator::new(store, constraints, dispatcher, consumers, config);

        let fx = Self { orchestrator, target };
        fx.store()
            .put_formation_template(&FormationTemplate {
                id: TEMPLATE_ID.into(),
                name: TEMPLATE_NAME.into(),
                application_types: vec!["crm".into()],
                runtime_types: vec!["kyma".into()],
                runtime_artifact_kind: None,
                supports_reset: true,
                leading_product_ids,
                scope: TemplateScope::Global,
                tenant_id: None,
            })
            .unwrap();

        let mut app = participant("app-x", ObjectType::Application, "crm");
        app.name = "App X".into();
        fx.register(app);
        let mut runtime = participant("rt-y", ObjectType::Runtime, "kyma");
        runtime.name = "Runtime Y".into();
        fx.register(runtime);
        fx.add_webhook("app-x", WebhookOwner::Application, WebhookMode::Sync);
        fx.add_webhook("rt-y", WebhookOwner::Runtime, WebhookMode::Sync);
        fx
    }

    pub fn store(&self) -> &StateStore {
        self.orchestrator.store()
    }

    pub fn caller(&self) -> Caller {
        Caller::tenant(TENANT)
    }

    pub fn catalog(&self) -> ConstraintCatalog {
        ConstraintCatalog::new(self.store().clone())
    }

    pub fn register(&self, participant: Participant) {
        self.store().put_participant(&participant).unwrap();
    }

    /// Replace the configuration-changed webhook of `owner`.
    pub fn add_webhook(&self, owner: &str, owner_type: WebhookOwner, mode: WebhookMode) {
        self.store()
            .put_webhook(&Webhook {
                id: format!("wh-{owner}"),
                owner_id: owner.into(),
                owner_type,
                webhook_type: WebhookType::ConfigurationChanged,
                mode,
                url_template: format!(
                    r#"{{"method": "{{{{if eq .Operation "assign"}}}}PATCH{{{{else}}}}DELETE{{{{end}}}}", "path": "http://{owner}.test/formations/{{{{ .FormationID }}}}"}}"#
                ),
                input_template: r#"{"operation": "{{ .Operation }}", "source": "{{ .Source.ID }}", "reverse": {{ json (default null .ReverseAssignment.Value) }}, "reset": {{ .Reset }}}"#.into(),
                output_template: match mode {
                    WebhookMode::Sync => OUTPUT.into(),
                    WebhookMode::Async => r#"{"success_status_code": 202}"#.into(),
                },
                header_template: None,
                auth: None,
            })
            .unwrap();
    }

    pub fn add_lifecycle_webhook(&self) {
        self.store()
            .put_webhook(&Webhook {
                id: "wh-lifecycle".into(),
                owner_id: TEMPLATE_ID.into(),
                owner_type: WebhookOwner::FormationTemplate,
                webhook_type: WebhookType::FormationLifecycle,
                mode: WebhookMode::Sync,
                url_template: "http://lifecycle.test/formations/{{ .FormationID }}".into(),
                input_template: r#"{"operation": "{{ .Operation }}", "name": "{{ .Formation.Name }}"}"#.into(),
                output_template: OUTPUT.into(),
                header_template: None,
                auth: None,
            })
            .unwrap();
    }

    pub fn assign(&self, object_type: ObjectType, object_id: &str, formation: &str) -> AssignRequest {
        AssignRequest {
            object_id: object_id.into(),
            object_type,
            formation_name: formation.into(),
            formation_template: Some(TEMPLATE_NAME.into()),
        }
    }

    pub fn assign_app(&self, object_id: &str, formation: &str) -> AssignRequest {
        self.assign(ObjectType::Application, object_id, formation)
    }

    pub fn assign_runtime(&self, object_id: &str, formation: &str) -> AssignRequest {
        self.assign(ObjectType::Runtime, object_id, formation)
    }
}

pub fn unassign(object_id: &str, object_type: ObjectType, formation: &str) -> UnassignRequest {
    UnassignRequest {
        object_id: object_id.into(),
        object_type,
        formation_name: formation.into(),
    }
}

pub fn participant(id: &str, object_type: ObjectType, subtype: &str) -> Participant {
    Participant {
        id: id.into(),
        object_type,
        name: id.into(),
        subtype: subtype.into(),
        labels: BTreeMap::new(),
        application_template_id: None,
        parent_id: None,
        owner_tenant_id: None,
    }
}

//! Template contexts for webhook rendering.
//!
//! The structs here serialize into the PascalCase JSON object that webhook
//! templates read from (`.FormationID`, `.Application.Labels.region`,
//! `.ReverseAssignment.Value`, ...). Optional objects that do not apply to a
//! notification serialize as `null`.

use std::collections::BTreeMap;

use compass_state::{
    ApplicationTemplate, AssignmentOperation, Formation, FormationAssignment, FormationTemplate,
    ObjectType, Participant,
};
use serde::Serialize;
use serde_json::Value;

/// A participant as seen by templates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParticipantView {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub object_type: ObjectType,
    #[serde(rename = "Subtype")]
    pub subtype: String,
    #[serde(rename = "Labels")]
    pub labels: BTreeMap<String, Value>,
    #[serde(rename = "ApplicationTemplateID")]
    pub application_template_id: Option<String>,
    #[serde(rename = "ParentID")]
    pub parent_id: Option<String>,
}

impl From<&Participant> for ParticipantView {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            object_type: p.object_type,
            subtype: p.subtype().to_string(),
            labels: p.labels().clone(),
            application_template_id: p.template_id().map(str::to_string),
            parent_id: p.parent_id.clone(),
        }
    }
}

/// An application template as seen by templates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TemplateView {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Labels")]
    pub labels: BTreeMap<String, Value>,
}

impl From<&ApplicationTemplate> for TemplateView {
    fn from(t: &ApplicationTemplate) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            labels: t.labels.clone(),
        }
    }
}

/// A formation assignment as seen by templates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssignmentView {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "SourceType")]
    pub source_type: ObjectType,
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "TargetType")]
    pub target_type: ObjectType,
    #[serde(rename = "State")]
    pub state: String,
    /// Configuration the target reported.
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

impl From<&FormationAssignment> for AssignmentView {
    fn from(a: &FormationAssignment) -> Self {
        Self {
            id: a.id.clone(),
            source: a.source.clone(),
            source_type: a.source_type,
            target: a.target.clone(),
            target_type: a.target_type,
            state: a.state.to_string(),
            value: a.value.clone().unwrap_or(Value::Null),
            error: a.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FormationView {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "FormationTemplateID")]
    pub formation_template_id: String,
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
}

impl From<&Formation> for FormationView {
    fn from(f: &Formation) -> Self {
        Self {
            id: f.id.clone(),
            name: f.name.clone(),
            formation_template_id: f.formation_template_id.clone(),
            tenant_id: f.tenant_id.clone(),
        }
    }
}

/// The tenant on whose behalf a notification is sent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CustomerTenantContext {
    #[serde(rename = "CustomerID")]
    pub customer_id: String,
    #[serde(rename = "AccountID")]
    pub account_id: Option<String>,
    #[serde(rename = "Path")]
    pub path: Option<String>,
}

impl CustomerTenantContext {
    pub fn for_tenant(tenant_id: &str) -> Self {
        Self {
            customer_id: tenant_id.to_string(),
            account_id: Some(tenant_id.to_string()),
            path: None,
        }
    }
}

/// One side of a notification: the participant plus the records templates
/// may reach through it.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub participant: Participant,
    pub application_template: Option<ApplicationTemplate>,
    /// Parent runtime of a runtime context.
    pub parent: Option<Participant>,
}

impl Endpoint {
    pub fn new(participant: Participant) -> Self {
        Self {
            participant,
            application_template: None,
            parent: None,
        }
    }

    fn is(&self, object_type: ObjectType) -> bool {
        self.participant.object_type == object_type
    }

    fn view(&self) -> ParticipantView {
        ParticipantView::from(&self.participant)
    }

    fn template_view(&self) -> Option<TemplateView> {
        self.application_template.as_ref().map(TemplateView::from)
    }
}

/// Context for an assignment notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationContext {
    /// `assign` or `unassign`.
    #[serde(rename = "Operation")]
    pub operation: String,
    #[serde(rename = "FormationID")]
    pub formation_id: String,
    #[serde(rename = "Formation")]
    pub formation: FormationView,
    #[serde(rename = "Assignment")]
    pub assignment: AssignmentView,
    #[serde(rename = "ReverseAssignment")]
    pub reverse_assignment: Option<AssignmentView>,
    #[serde(rename = "Source")]
    pub source: ParticipantView,
    #[serde(rename = "Target")]
    pub target: ParticipantView,
    #[serde(rename = "SourceApplication")]
    pub source_application: Option<ParticipantView>,
    #[serde(rename = "SourceApplicationTemplate")]
    pub source_application_template: Option<TemplateView>,
    #[serde(rename = "TargetApplication")]
    pub target_application: Option<ParticipantView>,
    #[serde(rename = "TargetApplicationTemplate")]
    pub target_application_template: Option<TemplateView>,
    #[serde(rename = "Application")]
    pub application: Option<ParticipantView>,
    #[serde(rename = "ApplicationTemplate")]
    pub application_template: Option<TemplateView>,
    #[serde(rename = "Runtime")]
    pub runtime: Option<ParticipantView>,
    #[serde(rename = "RuntimeContext")]
    pub runtime_context: Option<ParticipantView>,
    #[serde(rename = "CustomerTenantContext")]
    pub customer_tenant_context: Option<CustomerTenantContext>,
    /// Set when a reset resync asks the target to drop prior configuration.
    #[serde(rename = "Reset")]
    pub reset: bool,
}

impl NotificationContext {
    /// Build the context for `assignment` (source notifies target).
    ///
    /// `.Application` is the application endpoint (the target when both are
    /// applications), `.Runtime` the runtime endpoint or the parent runtime
    /// of a runtime context.
    pub fn build(
        operation: AssignmentOperation,
        formation: &Formation,
        assignment: &FormationAssignment,
        reverse: Option<&FormationAssignment>,
        source: &Endpoint,
        target: &Endpoint,
        reset: bool,
    ) -> Self {
        let app_endpoint = [target, source]
            .into_iter()
            .find(|e| e.is(ObjectType::Application));
        let runtime = [target, source].into_iter().find_map(|e| {
            if e.is(ObjectType::Runtime) {
                Some(e.view())
            } else if e.is(ObjectType::RuntimeContext) {
                e.parent.as_ref().map(ParticipantView::from)
            } else {
                None
            }
        });
        let runtime_context = [target, source]
            .into_iter()
            .find(|e| e.is(ObjectType::RuntimeContext))
            .map(Endpoint::view);

        Self {
            operation: operation.as_str().to_string(),
            formation_id: formation.id.clone(),
            formation: FormationView::from(formation),
            assignment: AssignmentView::from(assignment),
            reverse_assignment: reverse.map(AssignmentView::from),
            source: source.view(),
            target: target.view(),
            source_application: source.is(ObjectType::Application).then(|| source.view()),
            source_application_template: source
                .is(ObjectType::Application)
                .then(|| source.template_view())
                .flatten(),
            target_application: target.is(ObjectType::Application).then(|| target.view()),
            target_application_template: target
                .is(ObjectType::Application)
                .then(|| target.template_view())
                .flatten(),
            application: app_endpoint.map(Endpoint::view),
            application_template: app_endpoint.and_then(Endpoint::template_view),
            runtime,
            runtime_context,
            customer_tenant_context: Some(CustomerTenantContext::for_tenant(&formation.tenant_id)),
            reset,
        }
    }
}

/// Context for a formation lifecycle notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LifecycleContext {
    /// `createFormation` or `deleteFormation`.
    #[serde(rename = "Operation")]
    pub operation: String,
    #[serde(rename = "FormationID")]
    pub formation_id: String,
    #[serde(rename = "Formation")]
    pub formation: FormationView,
    #[serde(rename = "FormationTemplateID")]
    pub formation_template_id: String,
    #[serde(rename = "FormationTemplateName")]
    pub formation_template_name: String,
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
    #[serde(rename = "CustomerTenantContext")]
    pub customer_tenant_context: CustomerTenantContext,
}

/// Formation lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    CreateFormation,
    DeleteFormation,
}

impl LifecycleOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFormation => "createFormation",
            Self::DeleteFormation => "deleteFormation",
        }
    }
}

impl LifecycleContext {
    pub fn build(operation: LifecycleOperation, formation: &Formation, template: &FormationTemplate) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            formation_id: formation.id.clone(),
            formation: FormationView::from(formation),
            formation_template_id: template.id.clone(),
            formation_template_name: template.name.clone(),
            tenant_id: formation.tenant_id.clone(),
            customer_tenant_context: CustomerTenantContext::for_tenant(&formation.tenant_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_state::{AssignmentState, FormationState};
    use serde_json::json;

    fn participant(id: &str, object_type: ObjectType) -> Participant {
        Participant {
            id: id.into(),
            object_type,
            name: format!("{id}-name"),
            subtype: "type".into(),
            labels: BTreeMap::from([("region".to_string(), json!("eu-1"))]),
            application_template_id: None,
            parent_id: None,
            owner_tenant_id: None,
        }
    }

    fn formation() -> Formation {
        Formation {
            id: "f-1".into(),
            name: "alpha".into(),
            formation_template_id: "tpl".into(),
            tenant_id: "tenant-a".into(),
            state: FormationState::Initial,
            lifecycle_state: FormationState::Ready,
            error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn assignment(source: &str, target: &str, value: Option<Value>) -> FormationAssignment {
        FormationAssignment {
            id: format!("{source}->{target}"),
            formation_id: "f-1".into(),
            source: source.into(),
            source_type: ObjectType::Application,
            target: target.into(),
            target_type: ObjectType::Runtime,
            state: AssignmentState::Initial,
            value,
            config: None,
            error: None,
            last_operation: AssignmentOperation::Assign,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn app_to_runtime_context_fields() {
        let mut app = Endpoint::new(participant("app-1", ObjectType::Application));
        app.application_template = Some(ApplicationTemplate {
            id: "at-1".into(),
            name: "crm-template".into(),
            labels: BTreeMap::from([("composite".to_string(), json!(true))]),
        });
        let runtime = Endpoint::new(participant("rt-1", ObjectType::Runtime));
        let forward = assignment("app-1", "rt-1", None);
        let reverse = assignment("rt-1", "app-1", Some(json!({"url": "https://rt"})));

        let ctx = NotificationContext::build(
            AssignmentOperation::Assign,
            &formation(),
            &forward,
            Some(&reverse),
            &app,
            &runtime,
            false,
        );
        let value = serde_json::to_value(&ctx).unwrap();

        assert_eq!(value["Operation"], "assign");
        assert_eq!(value["FormationID"], "f-1");
        assert_eq!(value["Application"]["ID"], "app-1");
        assert_eq!(value["Application"]["Labels"]["region"], "eu-1");
        assert_eq!(value["ApplicationTemplate"]["Labels"]["composite"], true);
        assert_eq!(value["SourceApplicationTemplate"]["Name"], "crm-template");
        assert_eq!(value["Runtime"]["ID"], "rt-1");
        assert_eq!(value["RuntimeContext"], Value::Null);
        assert_eq!(value["TargetApplication"], Value::Null);
        assert_eq!(value["ReverseAssignment"]["Value"]["url"], "https://rt");
        assert_eq!(value["CustomerTenantContext"]["CustomerID"], "tenant-a");
        assert_eq!(value["Reset"], false);
    }

    #[test]
    fn runtime_context_exposes_parent_runtime() {
        let mut rtc = Endpoint::new(participant("rtc-1", ObjectType::RuntimeContext));
        rtc.parent = Some(participant("rt-1", ObjectType::Runtime));
        let app = Endpoint::new(participant("app-1", ObjectType::Application));

        let ctx = NotificationContext::build(
            AssignmentOperation::Unassign,
            &formation(),
            &assignment("app-1", "rtc-1", None),
            None,
            &app,
            &rtc,
            true,
        );
        assert_eq!(ctx.operation, "unassign");
        assert_eq!(ctx.runtime.as_ref().map(|r| r.id.as_str()), Some("rt-1"));
        assert_eq!(ctx.runtime_context.as_ref().map(|r| r.id.as_str()), Some("rtc-1"));
        assert!(ctx.reverse_assignment.is_none());
        assert!(ctx.reset);
    }

    #[test]
    fn lifecycle_operation_names() {
        let template = FormationTemplate {
            id: "tpl".into(),
            name: "side-by-side".into(),
            application_types: vec![],
            runtime_types: vec![],
            runtime_artifact_kind: None,
            supports_reset: false,
            leading_product_ids: vec![],
            scope: Default::default(),
            tenant_id: None,
        };
        let ctx = LifecycleContext::build(LifecycleOperation::DeleteFormation, &formation(), &template);
        assert_eq!(ctx.operation, "deleteFormation");
        assert_eq!(ctx.formation_template_name, "side-by-side");
    }
}

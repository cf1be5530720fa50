//! Constraint engine — resolves, renders and evaluates formation constraints.
//!
//! For a join point (PRE/POST × target operation) the engine selects every
//! GLOBAL constraint plus those attached to the formation's template, keeps
//! the ones whose resource type and subtype match the operation's resource,
//! renders each input template against the [`ConstraintContext`], and
//! invokes the named operator. PRE evaluation stops at the first denial;
//! POST evaluation collects all denials.

use std::collections::HashSet;
use std::sync::Arc;

use compass_state::{
    ConstraintScope, ConstraintType, Formation, FormationConstraint, ObjectType, Participant,
    StateStore, TargetOperation,
};
use compass_template::TemplateCache;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ConstraintResult;
use crate::operator::{Decision, OperatorKind};
use crate::registry::OperatorRegistry;

/// Subtype value matching any resource subtype.
pub const ANY_SUBTYPE: &str = "*";

/// A formation member as seen by constraint input templates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemberFact {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Type")]
    pub object_type: ObjectType,
    #[serde(rename = "Subtype")]
    pub subtype: String,
}

/// Facts about the operation under evaluation, exposed to input templates.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintContext {
    #[serde(rename = "FormationTemplateID")]
    pub formation_template_id: String,
    #[serde(rename = "FormationTemplateName")]
    pub formation_template_name: String,
    #[serde(rename = "FormationID")]
    pub formation_id: String,
    #[serde(rename = "FormationName")]
    pub formation_name: String,
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
    /// `None` for formation-level operations (create/delete formation).
    #[serde(rename = "ResourceType")]
    pub resource_type: Option<ObjectType>,
    #[serde(rename = "ResourceSubtype")]
    pub resource_subtype: String,
    #[serde(rename = "ResourceID")]
    pub resource_id: String,
    /// Templates of the other formations the resource belongs to.
    #[serde(rename = "ResourceFormationTemplateIDs")]
    pub resource_formation_template_ids: Vec<String>,
    #[serde(rename = "FormationMembers")]
    pub formation_members: Vec<MemberFact>,
    #[serde(rename = "SourceResourceType")]
    pub source_resource_type: Option<ObjectType>,
    #[serde(rename = "SourceResourceID")]
    pub source_resource_id: Option<String>,
    #[serde(rename = "SourceResourceSubtype")]
    pub source_resource_subtype: Option<String>,
    #[serde(rename = "TargetResourceType")]
    pub target_resource_type: Option<ObjectType>,
    #[serde(rename = "TargetResourceID")]
    pub target_resource_id: Option<String>,
    #[serde(rename = "TargetResourceSubtype")]
    pub target_resource_subtype: Option<String>,
}

impl ConstraintContext {
    /// Context for a formation-level operation. The resource is the formation
    /// itself and its subtype is the template name.
    pub fn for_formation(formation: &Formation, template_name: &str) -> Self {
        Self {
            formation_template_id: formation.formation_template_id.clone(),
            formation_template_name: template_name.to_string(),
            formation_id: formation.id.clone(),
            formation_name: formation.name.clone(),
            tenant_id: formation.tenant_id.clone(),
            resource_type: None,
            resource_subtype: template_name.to_string(),
            resource_id: formation.id.clone(),
            resource_formation_template_ids: Vec::new(),
            formation_members: Vec::new(),
            source_resource_type: None,
            source_resource_id: None,
            source_resource_subtype: None,
            target_resource_type: None,
            target_resource_id: None,
            target_resource_subtype: None,
        }
    }

    /// Context for an operation on one participant of a formation.
    pub fn for_participant(formation: &Formation, template_name: &str, resource: &Participant) -> Self {
        Self {
            resource_type: Some(resource.object_type),
            resource_subtype: resource.subtype().to_string(),
            resource_id: resource.id.clone(),
            ..Self::for_formation(formation, template_name)
        }
    }

    /// Context for a notification from `source` to `target`; the target is
    /// the resource constraints match against.
    pub fn for_notification(
        formation: &Formation,
        template_name: &str,
        source: &Participant,
        target: &Participant,
    ) -> Self {
        Self {
            source_resource_type: Some(source.object_type),
            source_resource_id: Some(source.id.clone()),
            source_resource_subtype: Some(source.subtype().to_string()),
            target_resource_type: Some(target.object_type),
            target_resource_id: Some(target.id.clone()),
            target_resource_subtype: Some(target.subtype().to_string()),
            ..Self::for_participant(formation, template_name, target)
        }
    }

    pub fn with_assigned_template_ids(mut self, template_ids: Vec<String>) -> Self {
        self.resource_formation_template_ids = template_ids;
        self
    }

    pub fn with_members(mut self, members: Vec<MemberFact>) -> Self {
        self.formation_members = members;
        self
    }
}

/// A single constraint's denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub constraint_id: String,
    pub constraint_name: String,
    pub reason: String,
}

/// Outcome of evaluating a join point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub denials: Vec<Denial>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.denials.is_empty()
    }

    /// Reasons joined for reporting, e.g. in a `ConstraintDenied` error.
    pub fn reason(&self) -> String {
        self.denials
            .iter()
            .map(|d| d.reason.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Evaluates constraints against the store's constraint catalog.
#[derive(Clone)]
pub struct ConstraintEngine {
    store: StateStore,
    registry: Arc<OperatorRegistry>,
    templates: Arc<TemplateCache>,
}

impl ConstraintEngine {
    pub fn new(store: StateStore, registry: OperatorRegistry, templates: Arc<TemplateCache>) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            templates,
        }
    }

    /// Constraints that apply at this join point, in creation order.
    pub fn applicable(
        &self,
        constraint_type: ConstraintType,
        operation: TargetOperation,
        ctx: &ConstraintContext,
    ) -> ConstraintResult<Vec<FormationConstraint>> {
        let attached: HashSet<String> = self
            .store
            .list_attachments_for_template(&ctx.formation_template_id)?
            .into_iter()
            .map(|a| a.constraint_id)
            .collect();

        let mut constraints: Vec<FormationConstraint> = self
            .store
            .list_constraints()?
            .into_iter()
            .filter(|c| {
                c.constraint_scope == ConstraintScope::Global || attached.contains(&c.id)
            })
            .filter(|c| c.constraint_type == constraint_type && c.target_operation == operation)
            .filter(|c| resource_matches(c, ctx))
            .collect();
        constraints.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        Ok(constraints)
    }

    /// Evaluate every applicable constraint.
    pub fn evaluate(
        &self,
        constraint_type: ConstraintType,
        operation: TargetOperation,
        ctx: &ConstraintContext,
    ) -> ConstraintResult<Verdict> {
        let constraints = self.applicable(constraint_type, operation, ctx)?;
        if constraints.is_empty() {
            return Ok(Verdict::default());
        }

        let context = serde_json::to_value(ctx)
            .map_err(|e| compass_template::TemplateError::Context(e.to_string()))?;

        let mut verdict = Verdict::default();
        for constraint in &constraints {
            let decision = self.evaluate_one(constraint, &context)?;
            debug!(
                constraint = %constraint.name,
                operator = %constraint.operator,
                %operation,
                allowed = decision.is_allowed(),
                "constraint evaluated"
            );
            if let Decision::Deny { reason } = decision {
                info!(
                    constraint = %constraint.name,
                    %operation,
                    formation = %ctx.formation_name,
                    %reason,
                    "constraint denied operation"
                );
                verdict.denials.push(Denial {
                    constraint_id: constraint.id.clone(),
                    constraint_name: constraint.name.clone(),
                    reason,
                });
                if constraint_type == ConstraintType::Pre {
                    break;
                }
            }
        }
        Ok(verdict)
    }

    fn evaluate_one(&self, constraint: &FormationConstraint, context: &Value) -> ConstraintResult<Decision> {
        let kind: OperatorKind = constraint.operator.parse()?;
        let source = if constraint.input_template.trim().is_empty() {
            kind.default_input_template()
        } else {
            constraint.input_template.as_str()
        };
        let template = self.templates.get_or_parse(source)?;
        let input: Value = template.render_json(context)?;
        self.registry.invoke(kind, &input)
    }
}

/// Whether a constraint's resource filter matches the operation's resource.
/// Formation-level operations ignore the resource type and match the
/// subtype against the template name.
fn resource_matches(constraint: &FormationConstraint, ctx: &ConstraintContext) -> bool {
    if let Some(resource_type) = ctx.resource_type {
        if constraint.resource_type != resource_type {
            return false;
        }
    }
    constraint.resource_subtype == ANY_SUBTYPE || constraint.resource_subtype == ctx.resource_subtype
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_state::{ConstraintAttachment, FormationState};
    use std::collections::BTreeMap;

    fn formation() -> Formation {
        Formation {
            id: "f-1".into(),
            name: "alpha".into(),
            formation_template_id: "tpl-1".into(),
            tenant_id: "tenant-a".into(),
            state: FormationState::Ready,
            lifecycle_state: FormationState::Ready,
            error: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn participant(id: &str, object_type: ObjectType, subtype: &str) -> Participant {
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

    fn constraint(
        id: &str,
        constraint_type: ConstraintType,
        operation: TargetOperation,
        operator: OperatorKind,
        resource_type: ObjectType,
        subtype: &str,
        scope: ConstraintScope,
    ) -> FormationConstraint {
        FormationConstraint {
            id: id.into(),
            name: id.into(),
            constraint_type,
            target_operation: operation,
            operator: operator.to_string(),
            resource_type,
            resource_subtype: subtype.into(),
            input_template: String::new(),
            constraint_scope: scope,
            created_at: 1,
        }
    }

    fn engine(store: &StateStore) -> ConstraintEngine {
        ConstraintEngine::new(
            store.clone(),
            OperatorRegistry::with_defaults(),
            Arc::new(TemplateCache::new()),
        )
    }

    #[test]
    fn scoped_constraint_requires_attachment() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_constraint(&constraint(
                "c1",
                ConstraintType::Pre,
                TargetOperation::AssignFormation,
                OperatorKind::IsNotAssignedToAnyFormationOfType,
                ObjectType::Tenant,
                "*",
                ConstraintScope::FormationType,
            ))
            .unwrap();
        let engine = engine(&store);
        let tenant = participant("t-1", ObjectType::Tenant, "account");
        let ctx = ConstraintContext::for_participant(&formation(), "side-by-side", &tenant)
            .with_assigned_template_ids(vec!["tpl-1".into()]);

        let verdict = engine
            .evaluate(ConstraintType::Pre, TargetOperation::AssignFormation, &ctx)
            .unwrap();
        assert!(verdict.is_allowed(), "unattached constraint must not apply");

        store
            .put_attachment(&ConstraintAttachment {
                constraint_id: "c1".into(),
                formation_template_id: "tpl-1".into(),
            })
            .unwrap();
        let verdict = engine
            .evaluate(ConstraintType::Pre, TargetOperation::AssignFormation, &ctx)
            .unwrap();
        assert!(!verdict.is_allowed());
        assert!(verdict.reason().contains("already assigned"));
    }

    #[test]
    fn resource_type_and_subtype_filter() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_constraint(&constraint(
                "c1",
                ConstraintType::Pre,
                TargetOperation::GenerateFormationAssignmentNotification,
                OperatorKind::DoNotGenerateFormationAssignmentNotification,
                ObjectType::Runtime,
                "kyma",
                ConstraintScope::Global,
            ))
            .unwrap();
        let engine = engine(&store);
        let app = participant("app-1", ObjectType::Application, "crm");
        let kyma = participant("rt-1", ObjectType::Runtime, "kyma");
        let other = participant("rt-2", ObjectType::Runtime, "other");

        let op = TargetOperation::GenerateFormationAssignmentNotification;
        let to_kyma = ConstraintContext::for_notification(&formation(), "t", &app, &kyma);
        let to_other = ConstraintContext::for_notification(&formation(), "t", &app, &other);
        let to_app = ConstraintContext::for_notification(&formation(), "t", &kyma, &app);

        assert!(!engine.evaluate(ConstraintType::Pre, op, &to_kyma).unwrap().is_allowed());
        assert!(engine.evaluate(ConstraintType::Pre, op, &to_other).unwrap().is_allowed());
        assert!(engine.evaluate(ConstraintType::Pre, op, &to_app).unwrap().is_allowed());
    }

    #[test]
    fn post_collects_all_denials_pre_stops_at_first() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, constraint_type) in [
            ("a", ConstraintType::Pre),
            ("b", ConstraintType::Pre),
            ("c", ConstraintType::Post),
            ("d", ConstraintType::Post),
        ] {
            store
                .put_constraint(&constraint(
                    id,
                    constraint_type,
                    TargetOperation::GenerateFormationAssignmentNotification,
                    OperatorKind::DoNotGenerateFormationAssignmentNotificationForLoops,
                    ObjectType::Application,
                    "*",
                    ConstraintScope::Global,
                ))
                .unwrap();
        }
        let engine = engine(&store);
        let app = participant("app-1", ObjectType::Application, "crm");
        let ctx = ConstraintContext::for_notification(&formation(), "t", &app, &app);
        let op = TargetOperation::GenerateFormationAssignmentNotification;

        let pre = engine.evaluate(ConstraintType::Pre, op, &ctx).unwrap();
        assert_eq!(pre.denials.len(), 1);
        assert_eq!(pre.denials[0].constraint_id, "a");

        let post = engine.evaluate(ConstraintType::Post, op, &ctx).unwrap();
        assert_eq!(post.denials.len(), 2);
    }

    #[test]
    fn custom_input_template_is_rendered() {
        let store = StateStore::open_in_memory().unwrap();
        let mut c = constraint(
            "c1",
            ConstraintType::Pre,
            TargetOperation::AssignFormation,
            OperatorKind::DoesNotContainResourceOfSubtype,
            ObjectType::Application,
            "crm",
            ConstraintScope::Global,
        );
        c.input_template = r#"{"formation_name": "{{ .FormationName }}", "resource_type": "APPLICATION", "resource_subtype": "crm", "resource_id": "{{ .ResourceID }}", "members": {{ json .FormationMembers }}}"#.into();
        store.put_constraint(&c).unwrap();

        let engine = engine(&store);
        let incoming = participant("app-2", ObjectType::Application, "crm");
        let ctx = ConstraintContext::for_participant(&formation(), "t", &incoming).with_members(vec![
            MemberFact {
                id: "app-1".into(),
                object_type: ObjectType::Application,
                subtype: "crm".into(),
            },
        ]);
        let verdict = engine
            .evaluate(ConstraintType::Pre, TargetOperation::AssignFormation, &ctx)
            .unwrap();
        assert_eq!(
            verdict.reason(),
            "Formation alpha already contains a APPLICATION of type crm"
        );
    }

    #[test]
    fn default_input_templates_escape_string_fields() {
        let mut tricky = formation();
        tricky.name = "team \"blue\" \\ ops\nwest".into();
        tricky.formation_template_id = "tpl-\"1\"".into();
        let mut app = participant("app-\"1\"", ObjectType::Application, "crm\\legacy");
        app.name = "App \"One\"".into();
        let runtime = participant("rt-1\n", ObjectType::Runtime, "kyma");

        let contexts = [
            ConstraintContext::for_formation(&tricky, "side \"by\" side"),
            ConstraintContext::for_participant(&tricky, "t", &app)
                .with_assigned_template_ids(vec!["tpl-\"1\"".into()]),
            ConstraintContext::for_notification(&tricky, "t", &app, &runtime),
        ];
        for kind in OperatorKind::ALL {
            let template = compass_template::Template::parse(kind.default_input_template()).unwrap();
            for ctx in &contexts {
                let context = serde_json::to_value(ctx).unwrap();
                let input: Value = template
                    .render_json(&context)
                    .unwrap_or_else(|e| panic!("{kind} rendered invalid JSON: {e}"));
                if let Some(name) = input.get("formation_name") {
                    assert_eq!(name, "team \"blue\" \\ ops\nwest");
                }
                if let Some(id) = input.get("formation_template_id") {
                    assert_eq!(id, "tpl-\"1\"");
                }
            }
        }
    }

    #[test]
    fn quoted_formation_name_is_denied_not_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_constraint(&constraint(
                "c1",
                ConstraintType::Pre,
                TargetOperation::AssignFormation,
                OperatorKind::DoesNotContainResourceOfSubtype,
                ObjectType::Application,
                "*",
                ConstraintScope::Global,
            ))
            .unwrap();
        let engine = engine(&store);
        let mut team = formation();
        team.name = "team \"blue\"".into();
        let incoming = participant("app-2", ObjectType::Application, "crm");
        let ctx = ConstraintContext::for_participant(&team, "t", &incoming).with_members(vec![MemberFact {
            id: "app-1".into(),
            object_type: ObjectType::Application,
            subtype: "crm".into(),
        }]);

        let verdict = engine
            .evaluate(ConstraintType::Pre, TargetOperation::AssignFormation, &ctx)
            .unwrap();
        assert_eq!(
            verdict.reason(),
            "Formation team \"blue\" already contains a APPLICATION of type crm"
        );
    }

    #[test]
    fn formation_level_operations_match_template_name() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_constraint(&constraint(
                "c1",
                ConstraintType::Pre,
                TargetOperation::CreateFormation,
                OperatorKind::DoesNotContainResourceOfSubtype,
                ObjectType::Application,
                "other-template",
                ConstraintScope::Global,
            ))
            .unwrap();
        let engine = engine(&store);
        let ctx = ConstraintContext::for_formation(&formation(), "side-by-side");
        assert!(engine
            .applicable(ConstraintType::Pre, TargetOperation::CreateFormation, &ctx)
            .unwrap()
            .is_empty());
    }
}

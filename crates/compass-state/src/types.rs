//! Domain types for the Compass state store.
//!
//! These types represent the persisted state of formations, their templates,
//! participants, memberships, pairwise assignments, webhooks, constraints,
//! and background operations. All types are serializable to/from JSON for
//! storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a formation.
pub type FormationId = String;

/// Unique identifier for a formation template.
pub type TemplateId = String;

/// Unique identifier for a formation participant (application, runtime, ...).
pub type ObjectId = String;

/// Unique identifier for a formation assignment.
pub type AssignmentId = String;

// ── Participants ───────────────────────────────────────────────────

/// Kind of object that can participate in a formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Application,
    Runtime,
    RuntimeContext,
    Tenant,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "APPLICATION",
            Self::Runtime => "RUNTIME",
            Self::RuntimeContext => "RUNTIME_CONTEXT",
            Self::Tenant => "TENANT",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "APPLICATION" => Ok(Self::Application),
            "RUNTIME" => Ok(Self::Runtime),
            "RUNTIME_CONTEXT" => Ok(Self::RuntimeContext),
            "TENANT" => Ok(Self::Tenant),
            other => Err(format!("unknown object type: {other}")),
        }
    }
}

/// A registered formation participant.
///
/// The `subtype` is the application type, runtime type, or tenant type the
/// formation template filters on. Runtime contexts point at their runtime via
/// `parent_id`; runtimes and tenants-owned objects carry `owner_tenant_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: ObjectId,
    pub object_type: ObjectType,
    pub name: String,
    pub subtype: String,
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
    #[serde(default)]
    pub application_template_id: Option<TemplateId>,
    #[serde(default)]
    pub parent_id: Option<ObjectId>,
    #[serde(default)]
    pub owner_tenant_id: Option<String>,
}

impl Participant {
    /// Build the composite key for the participants table.
    pub fn table_key(&self) -> String {
        participant_key(self.object_type, &self.id)
    }

    pub fn labels(&self) -> &BTreeMap<String, Value> {
        &self.labels
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// The application template this participant was created from, if any.
    pub fn template_id(&self) -> Option<&str> {
        self.application_template_id.as_deref()
    }
}

/// Composite key for a participant record.
pub fn participant_key(object_type: ObjectType, id: &str) -> String {
    format!("{object_type}/{id}")
}

/// Template from which applications are created. Its labels and webhooks are
/// inherited by the applications that reference it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
}

// ── Formation templates ────────────────────────────────────────────

/// Visibility of a formation template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateScope {
    #[default]
    Global,
    Tenant,
}

/// Kind of runtime artifact a formation template binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeArtifactKind {
    Subscription,
    ServiceInstance,
    EnvironmentInstance,
}

/// Declares which participant types may join a formation and whether its
/// notifications can be reset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormationTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub application_types: Vec<String>,
    #[serde(default)]
    pub runtime_types: Vec<String>,
    #[serde(default)]
    pub runtime_artifact_kind: Option<RuntimeArtifactKind>,
    #[serde(default)]
    pub supports_reset: bool,
    #[serde(default)]
    pub leading_product_ids: Vec<String>,
    #[serde(default)]
    pub scope: TemplateScope,
    /// Owning tenant for `TENANT`-scoped templates.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl FormationTemplate {
    /// Whether a tenant may create formations from this template.
    pub fn visible_to(&self, tenant_id: &str) -> bool {
        match self.scope {
            TemplateScope::Global => true,
            TemplateScope::Tenant => self.tenant_id.as_deref() == Some(tenant_id),
        }
    }
}

// ── Formations ─────────────────────────────────────────────────────

/// Aggregate state of a formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormationState {
    #[default]
    Initial,
    Ready,
    CreateError,
    DeleteError,
}

/// A named grouping of participants that notify each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formation {
    pub id: FormationId,
    pub name: String,
    pub formation_template_id: TemplateId,
    pub tenant_id: String,
    /// Aggregate of the lifecycle notification and all assignments.
    pub state: FormationState,
    /// Outcome of the formation's own lifecycle notification.
    #[serde(default)]
    pub lifecycle_state: FormationState,
    /// Error reported by the lifecycle notification, if it failed.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Membership of a participant in a formation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Membership {
    pub formation_id: FormationId,
    pub object_id: ObjectId,
    pub object_type: ObjectType,
    /// Tenant whose assignment pulled this participant in, if any.
    #[serde(default)]
    pub assigned_via: Option<ObjectId>,
    /// Set while delete notifications for this member are still unresolved.
    #[serde(default)]
    pub pending_unassign: bool,
    pub created_at: u64,
}

impl Membership {
    /// Build the composite key for the memberships table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.formation_id, self.object_id)
    }
}

// ── Formation assignments ──────────────────────────────────────────

/// Convergence state of a single directed assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentState {
    Initial,
    Ready,
    ConfigPending,
    CreateError,
    DeleteError,
}

impl AssignmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Ready => "READY",
            Self::ConfigPending => "CONFIG_PENDING",
            Self::CreateError => "CREATE_ERROR",
            Self::DeleteError => "DELETE_ERROR",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::CreateError | Self::DeleteError)
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIAL" => Ok(Self::Initial),
            "READY" => Ok(Self::Ready),
            "CONFIG_PENDING" => Ok(Self::ConfigPending),
            "CREATE_ERROR" => Ok(Self::CreateError),
            "DELETE_ERROR" => Ok(Self::DeleteError),
            other => Err(format!("unknown assignment state: {other}")),
        }
    }
}

/// The formation operation an assignment is currently converging for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentOperation {
    #[default]
    Assign,
    Unassign,
}

impl AssignmentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Unassign => "unassign",
        }
    }

    /// The error state an assignment lands in when this operation fails.
    pub fn error_state(&self) -> AssignmentState {
        match self {
            Self::Assign => AssignmentState::CreateError,
            Self::Unassign => AssignmentState::DeleteError,
        }
    }
}

/// Durable state of one directed notification relationship (source notifies
/// target) between two members of a formation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormationAssignment {
    pub id: AssignmentId,
    pub formation_id: FormationId,
    pub source: ObjectId,
    pub source_type: ObjectType,
    pub target: ObjectId,
    pub target_type: ObjectType,
    pub state: AssignmentState,
    /// Configuration reported by the target.
    #[serde(default)]
    pub value: Option<Value>,
    /// Payload last delivered to the target.
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub last_operation: AssignmentOperation,
    pub created_at: u64,
    pub updated_at: u64,
}

impl FormationAssignment {
    /// Build the composite key for the assignments table.
    pub fn table_key(&self) -> String {
        assignment_key(&self.formation_id, &self.source, &self.target)
    }

    /// Whether this is a participant's assignment to itself.
    pub fn is_loop(&self) -> bool {
        self.source == self.target
    }

    /// Whether either endpoint of this assignment is the given object.
    pub fn involves(&self, object_id: &str) -> bool {
        self.source == object_id || self.target == object_id
    }
}

/// Composite key for an assignment record; also the per-assignment lock key.
pub fn assignment_key(formation_id: &str, source: &str, target: &str) -> String {
    format!("{formation_id}/{source}/{target}")
}

// ── Webhooks ───────────────────────────────────────────────────────

/// Kind of object owning a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookOwner {
    Application,
    ApplicationTemplate,
    Runtime,
    FormationTemplate,
}

/// What a webhook is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookType {
    ConfigurationChanged,
    ApplicationTenantMapping,
    FormationLifecycle,
}

/// Whether the webhook reports its outcome in the response or via callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookMode {
    #[default]
    Sync,
    Async,
}

/// Static credentials applied to outbound webhook requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// A participant-owned, templated outbound notification target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: String,
    pub owner_id: String,
    pub owner_type: WebhookOwner,
    pub webhook_type: WebhookType,
    #[serde(default)]
    pub mode: WebhookMode,
    pub url_template: String,
    #[serde(default)]
    pub input_template: String,
    pub output_template: String,
    #[serde(default)]
    pub header_template: Option<String>,
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
}

impl Webhook {
    /// Build the composite key for the webhooks table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.owner_id, self.id)
    }
}

// ── Constraints ────────────────────────────────────────────────────

/// When a constraint runs relative to its target operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintType {
    Pre,
    Post,
}

/// Which templates a constraint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintScope {
    Global,
    FormationType,
}

/// Operations a constraint can gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetOperation {
    CreateFormation,
    DeleteFormation,
    AssignFormation,
    UnassignFormation,
    GenerateFormationAssignmentNotification,
    NotificationStatusReturned,
}

impl TargetOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFormation => "CREATE_FORMATION",
            Self::DeleteFormation => "DELETE_FORMATION",
            Self::AssignFormation => "ASSIGN_FORMATION",
            Self::UnassignFormation => "UNASSIGN_FORMATION",
            Self::GenerateFormationAssignmentNotification => {
                "GENERATE_FORMATION_ASSIGNMENT_NOTIFICATION"
            }
            Self::NotificationStatusReturned => "NOTIFICATION_STATUS_RETURNED",
        }
    }
}

impl fmt::Display for TargetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre/post policy rule gating formation mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormationConstraint {
    pub id: String,
    pub name: String,
    pub constraint_type: ConstraintType,
    pub target_operation: TargetOperation,
    /// Name of the registered operator this constraint invokes.
    pub operator: String,
    pub resource_type: ObjectType,
    /// Participant subtype the constraint matches; `*` matches any.
    pub resource_subtype: String,
    #[serde(default)]
    pub input_template: String,
    pub constraint_scope: ConstraintScope,
    pub created_at: u64,
}

/// Many-to-many relation between constraints and formation templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintAttachment {
    pub constraint_id: String,
    pub formation_template_id: TemplateId,
}

impl ConstraintAttachment {
    /// Build the composite key for the attachments table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.formation_template_id, self.constraint_id)
    }
}

// ── Operations ─────────────────────────────────────────────────────

/// Kind of scheduled background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    AssignmentNotification,
    FormationResync,
}

/// Lifecycle of a scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Scheduled,
    Completed,
    Failed,
}

/// A lightweight async job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    /// The assignment or formation this operation works on.
    pub resource_id: String,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_parses_case_insensitively() {
        assert_eq!("application".parse::<ObjectType>(), Ok(ObjectType::Application));
        assert_eq!("RUNTIME_CONTEXT".parse::<ObjectType>(), Ok(ObjectType::RuntimeContext));
        assert!("cluster".parse::<ObjectType>().is_err());
    }

    #[test]
    fn assignment_state_serializes_screaming_case() {
        let json = serde_json::to_string(&AssignmentState::ConfigPending).unwrap();
        assert_eq!(json, "\"CONFIG_PENDING\"");
        assert_eq!("DELETE_ERROR".parse::<AssignmentState>(), Ok(AssignmentState::DeleteError));
    }

    #[test]
    fn tenant_scoped_template_visibility() {
        let template = FormationTemplate {
            id: "t1".to_string(),
            name: "side-by-side".to_string(),
            application_types: vec![],
            runtime_types: vec![],
            runtime_artifact_kind: None,
            supports_reset: false,
            leading_product_ids: vec![],
            scope: TemplateScope::Tenant,
            tenant_id: Some("tenant-a".to_string()),
        };
        assert!(template.visible_to("tenant-a"));
        assert!(!template.visible_to("tenant-b"));
    }

    #[test]
    fn operation_error_state_follows_operation() {
        assert_eq!(AssignmentOperation::Assign.error_state(), AssignmentState::CreateError);
        assert_eq!(AssignmentOperation::Unassign.error_state(), AssignmentState::DeleteError);
    }
}

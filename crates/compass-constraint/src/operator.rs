//! Built-in constraint operators.
//!
//! Operators are pure functions from a rendered JSON input to a
//! [`Decision`]. All facts an operator needs (existing memberships, formation
//! members, notification endpoints) are rendered into its input by the
//! constraint's input template, so operators never touch the store.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConstraintError, ConstraintResult};

/// Outcome of a single operator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// The closed set of operators a constraint may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    /// Deny when the resource already belongs to another formation of the
    /// same formation template.
    IsNotAssignedToAnyFormationOfType,
    /// Deny when the formation already holds a resource of the same subtype.
    DoesNotContainResourceOfSubtype,
    /// Suppress notifications towards the matched resource.
    DoNotGenerateFormationAssignmentNotification,
    /// Suppress a participant's notification to itself.
    DoNotGenerateFormationAssignmentNotificationForLoops,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 4] = [
        Self::IsNotAssignedToAnyFormationOfType,
        Self::DoesNotContainResourceOfSubtype,
        Self::DoNotGenerateFormationAssignmentNotification,
        Self::DoNotGenerateFormationAssignmentNotificationForLoops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsNotAssignedToAnyFormationOfType => "IsNotAssignedToAnyFormationOfType",
            Self::DoesNotContainResourceOfSubtype => "DoesNotContainResourceOfSubtype",
            Self::DoNotGenerateFormationAssignmentNotification => {
                "DoNotGenerateFormationAssignmentNotification"
            }
            Self::DoNotGenerateFormationAssignmentNotificationForLoops => {
                "DoNotGenerateFormationAssignmentNotificationForLoops"
            }
        }
    }

    /// Input template used when a constraint does not supply its own.
    pub fn default_input_template(&self) -> &'static str {
        match self {
            Self::IsNotAssignedToAnyFormationOfType => concat!(
                r#"{"formation_template_id": {{ json .FormationTemplateID }}, "#,
                r#""resource_type": {{ json (default "" .ResourceType) }}, "#,
                r#""resource_subtype": {{ json .ResourceSubtype }}, "#,
                r#""resource_id": {{ json .ResourceID }}, "#,
                r#""assigned_formation_template_ids": {{ json .ResourceFormationTemplateIDs }}, "#,
                r#""except_formation_types": []}"#,
            ),
            Self::DoesNotContainResourceOfSubtype => concat!(
                r#"{"formation_name": {{ json .FormationName }}, "#,
                r#""resource_type": {{ json (default "" .ResourceType) }}, "#,
                r#""resource_subtype": {{ json .ResourceSubtype }}, "#,
                r#""resource_id": {{ json .ResourceID }}, "#,
                r#""members": {{ json .FormationMembers }}}"#,
            ),
            Self::DoNotGenerateFormationAssignmentNotification => concat!(
                r#"{"resource_type": {{ json (default "" .ResourceType) }}, "#,
                r#""resource_subtype": {{ json .ResourceSubtype }}, "#,
                r#""source_resource_type": {{ json (default "" .SourceResourceType) }}, "#,
                r#""source_resource_subtype": {{ json (default "" .SourceResourceSubtype) }}, "#,
                r#""except_subtypes": []}"#,
            ),
            Self::DoNotGenerateFormationAssignmentNotificationForLoops => concat!(
                r#"{"source_resource_id": {{ json (default "" .SourceResourceID) }}, "#,
                r#""target_resource_id": {{ json (default "" .TargetResourceID) }}}"#,
            ),
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorKind {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConstraintError::UnknownOperator(s.to_string()))
    }
}

fn parse_input<T: DeserializeOwned>(kind: OperatorKind, input: &Value) -> ConstraintResult<T> {
    serde_json::from_value(input.clone()).map_err(|e| ConstraintError::InvalidInput {
        operator: kind.to_string(),
        message: e.to_string(),
    })
}

// ── IsNotAssignedToAnyFormationOfType ──────────────────────────────

#[derive(Debug, Deserialize)]
struct NotAssignedInput {
    formation_template_id: String,
    resource_type: String,
    resource_id: String,
    #[serde(default)]
    assigned_formation_template_ids: Vec<String>,
    #[serde(default)]
    except_formation_types: Vec<String>,
}

pub fn is_not_assigned_to_any_formation_of_type(input: &Value) -> ConstraintResult<Decision> {
    let input: NotAssignedInput =
        parse_input(OperatorKind::IsNotAssignedToAnyFormationOfType, input)?;

    if input
        .except_formation_types
        .contains(&input.formation_template_id)
    {
        return Ok(Decision::Allow);
    }
    if input
        .assigned_formation_template_ids
        .contains(&input.formation_template_id)
    {
        return Ok(Decision::deny(format!(
            "{} with ID {} is already assigned to a formation of type {}",
            input.resource_type, input.resource_id, input.formation_template_id
        )));
    }
    Ok(Decision::Allow)
}

// ── DoesNotContainResourceOfSubtype ────────────────────────────────

#[derive(Debug, Deserialize)]
struct MemberFact {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Type")]
    object_type: String,
    #[serde(rename = "Subtype")]
    subtype: String,
}

#[derive(Debug, Deserialize)]
struct ContainsInput {
    formation_name: String,
    resource_type: String,
    resource_subtype: String,
    resource_id: String,
    #[serde(default)]
    members: Vec<MemberFact>,
}

pub fn does_not_contain_resource_of_subtype(input: &Value) -> ConstraintResult<Decision> {
    let input: ContainsInput = parse_input(OperatorKind::DoesNotContainResourceOfSubtype, input)?;

    let clash = input.members.iter().any(|m| {
        m.id != input.resource_id
            && m.object_type == input.resource_type
            && m.subtype == input.resource_subtype
    });
    if clash {
        return Ok(Decision::deny(format!(
            "Formation {} already contains a {} of type {}",
            input.formation_name, input.resource_type, input.resource_subtype
        )));
    }
    Ok(Decision::Allow)
}

// ── DoNotGenerateFormationAssignmentNotification ───────────────────

#[derive(Debug, Deserialize)]
struct SuppressInput {
    resource_type: String,
    resource_subtype: String,
    #[serde(default)]
    source_resource_subtype: String,
    #[serde(default)]
    except_subtypes: Vec<String>,
}

pub fn do_not_generate_notification(input: &Value) -> ConstraintResult<Decision> {
    let input: SuppressInput =
        parse_input(OperatorKind::DoNotGenerateFormationAssignmentNotification, input)?;

    if input.except_subtypes.contains(&input.source_resource_subtype) {
        return Ok(Decision::Allow);
    }
    Ok(Decision::deny(format!(
        "notifications to {} of type {} are not generated",
        input.resource_type, input.resource_subtype
    )))
}

// ── DoNotGenerateFormationAssignmentNotificationForLoops ───────────

#[derive(Debug, Deserialize)]
struct LoopInput {
    source_resource_id: String,
    target_resource_id: String,
}

pub fn do_not_generate_notification_for_loops(input: &Value) -> ConstraintResult<Decision> {
    let input: LoopInput = parse_input(
        OperatorKind::DoNotGenerateFormationAssignmentNotificationForLoops,
        input,
    )?;

    if input.source_resource_id == input.target_resource_id {
        return Ok(Decision::deny(format!(
            "self-notification for {} is not generated",
            input.source_resource_id
        )));
    }
    Ok(Decision::Allow)
}

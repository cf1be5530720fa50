//! Externally visible formation status.

use compass_state::{Formation, FormationAssignment, FormationState};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Ready,
    InProgress,
    CreateError,
    DeleteError,
}

impl From<FormationState> for Condition {
    fn from(state: FormationState) -> Self {
        match state {
            FormationState::Initial => Self::InProgress,
            FormationState::Ready => Self::Ready,
            FormationState::CreateError => Self::CreateError,
            FormationState::DeleteError => Self::DeleteError,
        }
    }
}

/// An error surfaced in the formation status. Assignment errors carry the
/// offending pair; a lifecycle error has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormationStatus {
    pub condition: Condition,
    pub errors: Vec<StatusError>,
}

impl FormationStatus {
    pub fn build(formation: &Formation, assignments: &[FormationAssignment]) -> Self {
        let mut errors = Vec::new();
        if let Some(message) = formation.error.as_ref().filter(|_| {
            matches!(
                formation.lifecycle_state,
                FormationState::CreateError | FormationState::DeleteError
            )
        }) {
            errors.push(StatusError {
                assignment_id: None,
                source: None,
                target: None,
                message: message.clone(),
            });
        }
        for assignment in assignments.iter().filter(|a| a.state.is_error()) {
            errors.push(StatusError {
                assignment_id: Some(assignment.id.clone()),
                source: Some(assignment.source.clone()),
                target: Some(assignment.target.clone()),
                message: assignment
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("assignment is in state {}", assignment.state)),
            });
        }
        Self {
            condition: formation.state.into(),
            errors,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.condition == Condition::Ready
    }
}

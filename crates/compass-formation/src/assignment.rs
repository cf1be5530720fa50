//! Formation assignment state machine.
//!
//! ```text
//! INITIAL ──assign notify──▶ READY | CONFIG_PENDING | CREATE_ERROR
//! READY ──unassign notify──▶ (deleted) | DELETE_ERROR
//! CONFIG_PENDING ──callback READY──▶ READY (assign) | (deleted) (unassign)
//! CONFIG_PENDING ──callback error──▶ CREATE_ERROR | DELETE_ERROR
//! *_ERROR ──resync──▶ INITIAL
//! ```
//!
//! Both the dispatch path and the status callback funnel into the pure
//! functions here; the orchestrator persists whatever [`Applied`] says.

use compass_notify::DispatchResult;
use compass_state::{AssignmentOperation, AssignmentState, FormationAssignment, epoch_secs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// What to do with an assignment row after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Update(FormationAssignment),
    Delete,
    NoOp,
}

/// Body of an async status callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: AssignmentState,
    #[serde(default)]
    pub configuration: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    fn error_message(&self) -> Option<String> {
        self.error
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(str::to_string)
    }

    fn configuration(&self) -> Option<Value> {
        self.configuration.clone().filter(|c| !c.is_null())
    }
}

/// Apply the outcome of a notification to the assignment it was sent for.
pub fn apply_dispatch(assignment: &FormationAssignment, result: &DispatchResult) -> Applied {
    let operation = assignment.last_operation;
    if operation == AssignmentOperation::Unassign && result.state == AssignmentState::Ready {
        return Applied::Delete;
    }

    let mut next = assignment.clone();
    next.state = result.state;
    next.error = result.error.clone();
    if result.payload.is_some() {
        next.config = result.payload.clone();
    }
    if result.config.is_some() {
        next.value = result.config.clone();
    }
    next.updated_at = epoch_secs();
    Applied::Update(next)
}

/// Apply a status callback.
///
/// Callbacks are accepted while a notification is outstanding
/// (CONFIG_PENDING) or after it was given up on (the pending operation's
/// error state). A READY assignment only accepts a READY report carrying new
/// configuration. Anything else is an out-of-order callback and a no-op.
pub fn apply_report(assignment: &FormationAssignment, report: &StatusReport) -> Applied {
    let operation = assignment.last_operation;
    let current = assignment.state;

    let awaiting = current == AssignmentState::ConfigPending || current == operation.error_state();
    let refresh = current == AssignmentState::Ready
        && report.state == AssignmentState::Ready
        && operation == AssignmentOperation::Assign;
    if !awaiting && !refresh {
        warn!(
            assignment = %assignment.id,
            current = %current,
            reported = %report.state,
            operation = operation.as_str(),
            "ignoring status report in current state"
        );
        return Applied::NoOp;
    }

    let mut next = assignment.clone();
    match report.state {
        AssignmentState::Ready if operation == AssignmentOperation::Unassign => return Applied::Delete,
        AssignmentState::Ready | AssignmentState::ConfigPending => {
            next.state = report.state;
            next.error = None;
            if let Some(configuration) = report.configuration() {
                next.value = Some(configuration);
            }
        }
        AssignmentState::CreateError | AssignmentState::DeleteError => {
            next.state = operation.error_state();
            next.error = Some(
                report
                    .error_message()
                    .unwrap_or_else(|| format!("target reported {}", report.state)),
            );
        }
        AssignmentState::Initial => return Applied::NoOp,
    }

    if next.state == assignment.state && next.value == assignment.value && next.error == assignment.error {
        return Applied::NoOp;
    }
    next.updated_at = epoch_secs();
    Applied::Update(next)
}

/// Prepare an assignment for re-delivery by a resync.
///
/// A failed unassign is retried as an unassign; everything else is sent as
/// an assign. A reset also drops the configuration exchanged so far.
pub fn prepare_resync(assignment: &FormationAssignment, reset: bool) -> FormationAssignment {
    let mut next = assignment.clone();
    if assignment.state == AssignmentState::DeleteError {
        next.last_operation = AssignmentOperation::Unassign;
    }
    next.state = AssignmentState::Initial;
    next.error = None;
    if reset {
        next.value = None;
        next.config = None;
    }
    next.updated_at = epoch_secs();
    next
}

/// Prepare an assignment for its unassign notification.
pub fn prepare_unassign(assignment: &FormationAssignment) -> FormationAssignment {
    let mut next = assignment.clone();
    next.last_operation = AssignmentOperation::Unassign;
    next.state = AssignmentState::Initial;
    next.error = None;
    next.updated_at = epoch_secs();
    next
}

/// Whether the target ever saw the assign notification for this row; rows
/// that never reached the target are dropped on unassign without a call.
pub fn reached_target(assignment: &FormationAssignment) -> bool {
    !(assignment.last_operation == AssignmentOperation::Assign
        && matches!(assignment.state, AssignmentState::Initial | AssignmentState::CreateError))
}

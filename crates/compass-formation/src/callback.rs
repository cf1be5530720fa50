//! Asynchronous status callbacks.
//!
//! Targets of async webhooks (and sync webhooks that answered with the
//! incomplete status code) report the outcome later. The caller must be a
//! consumer mapped to the assignment's target. A callback that changes the
//! configuration re-notifies the reverse assignment once so the other side
//! sees the new value.

use compass_constraint::ConstraintContext;
use compass_state::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assignment::{Applied, StatusReport, apply_report};
use crate::error::{FormationError, FormationResult};
use crate::orchestrator::{Orchestrator, kind_name};

/// What a status callback did to its assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Updated { assignment: FormationAssignment },
    /// A completed unassign removed the assignment.
    Deleted,
    /// Out-of-order or repeated report.
    Unchanged,
    /// The assignment no longer exists.
    Ignored,
}

impl CallbackOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::Ignored => "ignored",
        }
    }
}

impl Orchestrator {
    pub async fn update_assignment_status(
        &self,
        formation_id: &str,
        assignment_id: &str,
        consumer_id: Option<&str>,
        report: StatusReport,
    ) -> FormationResult<CallbackOutcome> {
        let unauthorized = || FormationError::CallbackUnauthorized {
            caller: consumer_id.unwrap_or("anonymous").to_string(),
            assignment: assignment_id.to_string(),
        };
        // Reject unknown callers before any lookup.
        if !consumer_id.is_some_and(|c| self.inner.consumers.knows(c)) {
            return Err(unauthorized());
        }

        let store = &self.inner.store;
        let formation = self.reload(formation_id)?;
        if report.state == AssignmentState::Initial {
            return Err(FormationError::Validation(
                "state=INITIAL cannot be reported".to_string(),
            ));
        }
        let Some(assignment) = store.find_assignment(formation_id, assignment_id)? else {
            debug!(formation = %formation_id, assignment = %assignment_id, "status report for unknown assignment");
            return Ok(CallbackOutcome::Ignored);
        };

        let target = store
            .get_participant(assignment.target_type, &assignment.target)?
            .ok_or_else(|| FormationError::not_found(kind_name(assignment.target_type), &assignment.target))?;
        let authorized = consumer_id.is_some_and(|c| self.inner.consumers.may_report_for(c, &target));
        if !authorized {
            return Err(unauthorized());
        }

        let template = self.template_for(&formation)?;
        let source = store
            .get_participant(assignment.source_type, &assignment.source)?
            .ok_or_else(|| FormationError::not_found(kind_name(assignment.source_type), &assignment.source))?;
        let ctx = ConstraintContext::for_notification(&formation, &template.name, &source, &target);
        self.pre(TargetOperation::NotificationStatusReturned, &ctx)?;

        let key = assignment.table_key();
        let (outcome, value_changed) = {
            let _guard = self.inner.assignment_locks.lock(&key).await;
            let Some(current) = store.get_assignment(&formation.id, &assignment.source, &assignment.target)? else {
                return Ok(CallbackOutcome::Ignored);
            };
            match apply_report(&current, &report) {
                Applied::Update(next) => {
                    store.put_assignment(&next)?;
                    if next.state == AssignmentState::Ready {
                        self.finish_operations(&next.id, None)?;
                    } else if next.state.is_error() {
                        self.finish_operations(&next.id, next.error.clone())?;
                    }
                    let value_changed =
                        next.value != current.value && next.last_operation == AssignmentOperation::Assign;
                    (CallbackOutcome::Updated { assignment: next }, value_changed)
                }
                Applied::Delete => {
                    store.delete_assignment(&key)?;
                    self.finish_operations(&current.id, None)?;
                    (CallbackOutcome::Deleted, false)
                }
                Applied::NoOp => (CallbackOutcome::Unchanged, false),
            }
        };
        info!(
            formation = %formation.id,
            assignment = %assignment_id,
            reported = %report.state,
            outcome = outcome.label(),
            "assignment status reported"
        );

        if value_changed && !assignment.is_loop() {
            let reverse = store.get_assignment(&formation.id, &assignment.target, &assignment.source)?;
            if let Some(reverse) = reverse.filter(|r| r.last_operation == AssignmentOperation::Assign) {
                debug!(assignment = %reverse.id, "re-notifying reverse assignment with new configuration");
                if let Err(error) = self.notify_assignment(&formation, &template.name, &reverse, false).await {
                    warn!(assignment = %reverse.id, %error, "reverse notification failed");
                }
            }
        }

        if outcome == CallbackOutcome::Deleted {
            self.release_pending(&formation.id)?;
        }
        self.post(TargetOperation::NotificationStatusReturned, &ctx)?;
        self.refresh_state(&formation.id)?;
        Ok(outcome)
    }
}

//! Formation resynchronization.
//!
//! A resync re-sends every notification that has not reached READY. With
//! `reset` it re-sends all of them with the exchanged configuration dropped
//! and `.Reset` set in the notification context. A failed lifecycle
//! notification is retried first.

use compass_notify::LifecycleOperation;
use compass_state::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::assignment::prepare_resync;
use crate::authz::Caller;
use crate::error::{FormationError, FormationResult};
use crate::orchestrator::{NotificationErrors, Orchestrator};

/// Outcome of a resync. `errors` maps the IDs of assignments (or the
/// formation, for its lifecycle notification) to their failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResyncReport {
    pub formation: Formation,
    pub operation_id: String,
    /// True when a retried lifecycle deletion removed the formation.
    pub deleted: bool,
    pub errors: NotificationErrors,
}

impl Orchestrator {
    pub async fn resync(&self, caller: &Caller, formation_id: &str, reset: bool) -> FormationResult<ResyncReport> {
        let formation = self.get_formation(caller, formation_id)?;
        let template = self.template_for(&formation)?;
        if reset && !template.supports_reset {
            return Err(FormationError::Unsupported(format!(
                "formation template {} does not support reset",
                template.name
            )));
        }

        let _guard = self.inner.formation_locks.lock(&formation.id).await;
        let formation = self.reload(&formation.id)?;
        let store = &self.inner.store;

        let now = epoch_secs();
        let mut operation = Operation {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type: OperationType::FormationResync,
            status: OperationStatus::Scheduled,
            resource_id: formation.id.clone(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        store.put_operation(&operation)?;
        info!(formation = %formation.id, operation = %operation.id, reset, "resynchronizing formation");

        let mut errors = NotificationErrors::new();
        match formation.lifecycle_state {
            FormationState::CreateError => {
                let outcome = self
                    .notify_lifecycle(&formation, &template, LifecycleOperation::CreateFormation)
                    .await?;
                if let Some(error) = outcome.error.filter(|_| !outcome.succeeded) {
                    errors.insert(formation.id.clone(), error);
                }
            }
            FormationState::DeleteError if store.list_memberships(&formation.id)?.is_empty() => {
                let outcome = self
                    .notify_lifecycle(&formation, &template, LifecycleOperation::DeleteFormation)
                    .await?;
                if outcome.succeeded {
                    self.delete_cascade(&formation)?;
                    self.close_operation(&mut operation, &errors)?;
                    return Ok(ResyncReport {
                        formation,
                        operation_id: operation.id,
                        deleted: true,
                        errors,
                    });
                }
                errors.insert(
                    formation.id.clone(),
                    outcome.error.unwrap_or_else(|| "formation deletion failed".to_string()),
                );
            }
            _ => {}
        }

        let selected: Vec<FormationAssignment> = store
            .list_assignments(&formation.id)?
            .iter()
            .filter(|a| reset || a.state != AssignmentState::Ready)
            .map(|a| prepare_resync(a, reset))
            .collect();
        store.put_assignments(&selected)?;
        let resent = selected.len();
        errors.extend(self.dispatch_batch(&formation, &template, selected, reset).await);
        self.release_pending(&formation.id)?;

        self.close_operation(&mut operation, &errors)?;
        if errors.is_empty() {
            info!(formation = %formation.id, resent, "formation resynchronized");
        } else {
            warn!(formation = %formation.id, resent, failed = errors.len(), "formation resync incomplete");
        }
        let formation = self.refresh_state(&formation.id)?;
        Ok(ResyncReport {
            formation,
            operation_id: operation.id,
            deleted: false,
            errors,
        })
    }

    fn close_operation(&self, operation: &mut Operation, errors: &NotificationErrors) -> StateResult<()> {
        if errors.is_empty() {
            operation.status = OperationStatus::Completed;
        } else {
            operation.status = OperationStatus::Failed;
            operation.error = Some(
                errors
                    .iter()
                    .map(|(id, error)| format!("{id}: {error}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            );
        }
        operation.updated_at = epoch_secs();
        self.inner.store.put_operation(operation)
    }
}

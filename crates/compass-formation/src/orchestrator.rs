//! Formation orchestrator — the top-level coordinator for formation
//! mutations.
//!
//! An assign runs: template compatibility → PRE constraints → membership →
//! pairwise assignments → parallel notification fan-out → POST constraints →
//! aggregate state. Unassign mirrors it with delete notifications; a member
//! stays `pending_unassign` until all of its rows are gone.
//!
//! Locking: a per-(tenant, name) lock guards formation creation, a
//! per-formation lock serializes membership changes, deletion and resync,
//! and a per-assignment-key lock allows at most one in-flight notification
//! or callback per ordered pair.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use compass_constraint::{ConstraintContext, ConstraintEngine, Denial, MemberFact};
use compass_notify::{
    DispatchResult, Dispatcher, LifecycleContext, LifecycleOperation, LifecycleOutcome,
    NotificationContext,
};
use compass_state::*;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::assignment::{Applied, apply_dispatch, prepare_unassign, reached_target};
use crate::authz::{Caller, ConsumerDirectory, is_leading_product};
use crate::error::{FormationError, FormationResult};
use crate::locks::KeyedLocks;
use crate::matrix::{Member, aggregate_state, new_assignment, pairs_for_join};
use crate::participants::{check_compatible, lifecycle_webhook, load_endpoint, resolve_webhook};
use crate::status::FormationStatus;

/// Orchestrator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Upper bound for one notification, retries included.
    pub notification_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            notification_timeout: Duration::from_secs(60),
        }
    }
}

/// Assign `object_id` to the formation named `formation_name`, creating the
/// formation from `formation_template` if it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AssignRequest {
    pub object_id: String,
    pub object_type: ObjectType,
    pub formation_name: String,
    #[serde(default)]
    pub formation_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UnassignRequest {
    pub object_id: String,
    pub object_type: ObjectType,
    pub formation_name: String,
}

/// Result of a formation mutation. POST-constraint denials do not roll the
/// mutation back; they are reported here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub formation: Formation,
    pub post_denials: Vec<Denial>,
}

/// Result of a formation deletion. When the lifecycle webhook rejects the
/// deletion the formation is kept in DELETE_ERROR and `deleted` is false.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub formation: Formation,
    pub deleted: bool,
    pub post_denials: Vec<Denial>,
}

/// Failed notifications of a batch: assignment ID → error message.
pub type NotificationErrors = BTreeMap<String, String>;

/// Coordinates formation mutations. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) store: StateStore,
    pub(crate) constraints: ConstraintEngine,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) consumers: ConsumerDirectory,
    pub(crate) config: OrchestratorConfig,
    name_locks: KeyedLocks,
    pub(crate) formation_locks: KeyedLocks,
    pub(crate) assignment_locks: KeyedLocks,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        constraints: ConstraintEngine,
        dispatcher: Dispatcher,
        consumers: ConsumerDirectory,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                constraints,
                dispatcher,
                consumers,
                config,
                name_locks: KeyedLocks::new(),
                formation_locks: KeyedLocks::new(),
                assignment_locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    // ── Queries ────────────────────────────────────────────────────

    /// A formation visible to the caller's tenant.
    pub fn get_formation(&self, caller: &Caller, formation_id: &str) -> FormationResult<Formation> {
        self.inner
            .store
            .get_formation(formation_id)?
            .filter(|f| f.tenant_id == caller.tenant_id)
            .ok_or_else(|| FormationError::not_found("formation", formation_id))
    }

    pub fn list_formations(&self, caller: &Caller) -> FormationResult<Vec<Formation>> {
        Ok(self.inner.store.list_formations(Some(&caller.tenant_id))?)
    }

    pub fn list_assignments(&self, caller: &Caller, formation_id: &str) -> FormationResult<Vec<FormationAssignment>> {
        let formation = self.get_formation(caller, formation_id)?;
        Ok(self.inner.store.list_assignments(&formation.id)?)
    }

    pub fn formation_status(&self, caller: &Caller, formation_id: &str) -> FormationResult<FormationStatus> {
        let formation = self.get_formation(caller, formation_id)?;
        let assignments = self.inner.store.list_assignments(&formation.id)?;
        Ok(FormationStatus::build(&formation, &assignments))
    }

    // ── Create ─────────────────────────────────────────────────────

    pub async fn create_formation(
        &self,
        caller: &Caller,
        name: &str,
        template_ref: &str,
    ) -> FormationResult<MutationOutcome> {
        require("name", name)?;
        require("formationTemplate", template_ref)?;
        let template = self.resolve_template(caller, template_ref)?;
        let _name_guard = self.inner.name_locks.lock(&name_key(&caller.tenant_id, name)).await;
        self.create_locked(caller, name, &template).await
    }

    /// Create a formation; the caller holds the name lock.
    async fn create_locked(
        &self,
        caller: &Caller,
        name: &str,
        template: &FormationTemplate,
    ) -> FormationResult<MutationOutcome> {
        let store = &self.inner.store;
        if !is_leading_product(template, caller) {
            return Err(FormationError::Forbidden(format!(
                "consumer {} may not create formations of type {}",
                caller.consumer_id.as_deref().unwrap_or_default(),
                template.name
            )));
        }
        if store.find_formation_by_name(&caller.tenant_id, name)?.is_some() {
            return Err(FormationError::AlreadyExists(format!("formation {name}")));
        }

        let now = epoch_secs();
        let formation = Formation {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            formation_template_id: template.id.clone(),
            tenant_id: caller.tenant_id.clone(),
            state: FormationState::Initial,
            lifecycle_state: FormationState::Initial,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let ctx = ConstraintContext::for_formation(&formation, &template.name);
        self.pre(TargetOperation::CreateFormation, &ctx)?;

        store.put_formation(&formation)?;
        info!(formation = %formation.id, name = %formation.name, template = %template.name, "formation created");

        self.notify_lifecycle(&formation, template, LifecycleOperation::CreateFormation)
            .await?;
        let post_denials = self.post(TargetOperation::CreateFormation, &ctx)?;
        let formation = self.refresh_state(&formation.id)?;
        Ok(MutationOutcome {
            formation,
            post_denials,
        })
    }

    // ── Assign ─────────────────────────────────────────────────────

    pub async fn assign(&self, caller: &Caller, request: &AssignRequest) -> FormationResult<MutationOutcome> {
        require("objectID", &request.object_id)?;
        require("formationName", &request.formation_name)?;
        let store = &self.inner.store;

        let formation = {
            let _name_guard = self
                .inner
                .name_locks
                .lock(&name_key(&caller.tenant_id, &request.formation_name))
                .await;
            match store.find_formation_by_name(&caller.tenant_id, &request.formation_name)? {
                Some(formation) => formation,
                None => match request.formation_template.as_deref() {
                    Some(template_ref) => {
                        let template = self.resolve_template(caller, template_ref)?;
                        self.create_locked(caller, &request.formation_name, &template)
                            .await?
                            .formation
                    }
                    None => return Err(FormationError::not_found("formation", &request.formation_name)),
                },
            }
        };

        let _guard = self.inner.formation_locks.lock(&formation.id).await;
        let formation = self.reload(&formation.id)?;
        let template = self.template_for(&formation)?;
        let participant = store
            .get_participant(request.object_type, &request.object_id)?
            .ok_or_else(|| FormationError::not_found(kind_name(request.object_type), &request.object_id))?;

        let mut post_denials = self.assign_member(&formation, &template, &participant, None).await?;

        if participant.object_type == ObjectType::Tenant {
            let runtimes = store
                .list_participants(ObjectType::Runtime)?
                .into_iter()
                .filter(|rt| rt.owner_tenant_id.as_deref() == Some(participant.id.as_str()))
                .filter(|rt| template.runtime_types.iter().any(|t| t == rt.subtype()));
            for runtime in runtimes {
                match self
                    .assign_member(&formation, &template, &runtime, Some(&participant.id))
                    .await
                {
                    Ok(denials) => post_denials.extend(denials),
                    Err(e) => warn!(
                        formation = %formation.id,
                        tenant = %participant.id,
                        runtime = %runtime.id,
                        error = %e,
                        "skipping tenant runtime"
                    ),
                }
            }
        }

        let formation = self.refresh_state(&formation.id)?;
        Ok(MutationOutcome {
            formation,
            post_denials,
        })
    }

    /// Add one participant; the caller holds the formation lock.
    async fn assign_member(
        &self,
        formation: &Formation,
        template: &FormationTemplate,
        participant: &Participant,
        assigned_via: Option<&str>,
    ) -> FormationResult<Vec<Denial>> {
        let store = &self.inner.store;
        let parent = match (participant.object_type, participant.parent_id.as_deref()) {
            (ObjectType::RuntimeContext, Some(parent_id)) => store.get_participant(ObjectType::Runtime, parent_id)?,
            _ => None,
        };
        check_compatible(template, participant, parent.as_ref())?;

        if let Some(existing) = store.get_membership(&formation.id, &participant.id)? {
            if existing.pending_unassign {
                return Err(FormationError::Conflict(format!(
                    "{} {} is still being unassigned from formation {}",
                    kind_name(participant.object_type),
                    participant.name,
                    formation.name
                )));
            }
            debug!(formation = %formation.id, object = %participant.id, "already a member");
            return Ok(Vec::new());
        }

        let ctx = self.participant_context(formation, template, participant)?;
        self.pre(TargetOperation::AssignFormation, &ctx)?;

        let members: Vec<Member> = store
            .list_memberships(&formation.id)?
            .iter()
            .filter(|m| !m.pending_unassign)
            .map(Member::from)
            .collect();
        store.put_membership(&Membership {
            formation_id: formation.id.clone(),
            object_id: participant.id.clone(),
            object_type: participant.object_type,
            assigned_via: assigned_via.map(str::to_string),
            pending_unassign: false,
            created_at: epoch_secs(),
        })?;
        info!(
            formation = %formation.id,
            object = %participant.id,
            object_type = %participant.object_type,
            "participant assigned"
        );

        let joining = Member::new(participant.id.clone(), participant.object_type);
        let pairs = pairs_for_join(&members, &joining);
        if !pairs.is_empty() {
            if pairs.iter().all(|(source, target)| source.id != target.id) {
                for stale in store
                    .list_assignments(&formation.id)?
                    .into_iter()
                    .filter(FormationAssignment::is_loop)
                {
                    store.delete_assignment(&stale.table_key())?;
                }
            }
            let assignments: Vec<FormationAssignment> = pairs
                .iter()
                .map(|(source, target)| new_assignment(&formation.id, source, target))
                .collect();
            store.put_assignments(&assignments)?;
            let errors = self.dispatch_batch(formation, template, assignments, false).await;
            if !errors.is_empty() {
                warn!(formation = %formation.id, failed = errors.len(), "assign notifications failed");
            }
        }

        self.post(TargetOperation::AssignFormation, &ctx)
    }

    // ── Unassign ───────────────────────────────────────────────────

    pub async fn unassign(&self, caller: &Caller, request: &UnassignRequest) -> FormationResult<MutationOutcome> {
        require("objectID", &request.object_id)?;
        require("formationName", &request.formation_name)?;
        let store = &self.inner.store;

        let formation = store
            .find_formation_by_name(&caller.tenant_id, &request.formation_name)?
            .ok_or_else(|| FormationError::not_found("formation", &request.formation_name))?;
        let _guard = self.inner.formation_locks.lock(&formation.id).await;
        let formation = self.reload(&formation.id)?;
        let template = self.template_for(&formation)?;

        let pulled_in: Vec<Membership> = if request.object_type == ObjectType::Tenant {
            store
                .list_memberships(&formation.id)?
                .into_iter()
                .filter(|m| m.assigned_via.as_deref() == Some(request.object_id.as_str()))
                .collect()
        } else {
            Vec::new()
        };

        let mut post_denials = self
            .unassign_member(&formation, &template, request.object_type, &request.object_id)
            .await?;
        for member in pulled_in {
            match self
                .unassign_member(&formation, &template, member.object_type, &member.object_id)
                .await
            {
                Ok(denials) => post_denials.extend(denials),
                Err(e) => warn!(
                    formation = %formation.id,
                    object = %member.object_id,
                    error = %e,
                    "failed to unassign tenant runtime"
                ),
            }
        }

        let formation = self.refresh_state(&formation.id)?;
        Ok(MutationOutcome {
            formation,
            post_denials,
        })
    }

    /// Remove one participant; the caller holds the formation lock.
    async fn unassign_member(
        &self,
        formation: &Formation,
        template: &FormationTemplate,
        object_type: ObjectType,
        object_id: &str,
    ) -> FormationResult<Vec<Denial>> {
        let store = &self.inner.store;
        let Some(mut membership) = store.get_membership(&formation.id, object_id)? else {
            debug!(formation = %formation.id, object = %object_id, "not a member, nothing to unassign");
            return Ok(Vec::new());
        };
        let participant = store
            .get_participant(object_type, object_id)?
            .unwrap_or_else(|| detached_participant(&membership));

        let ctx = self.participant_context(formation, template, &participant)?;
        self.pre(TargetOperation::UnassignFormation, &ctx)?;

        let (notify, unreached): (Vec<_>, Vec<_>) = store
            .list_assignments(&formation.id)?
            .into_iter()
            .filter(|a| a.involves(object_id))
            .partition(reached_target);
        for assignment in &unreached {
            store.delete_assignment(&assignment.table_key())?;
        }
        let prepared: Vec<FormationAssignment> = notify.iter().map(prepare_unassign).collect();
        store.put_assignments(&prepared)?;

        membership.pending_unassign = true;
        store.put_membership(&membership)?;

        let errors = self.dispatch_batch(formation, template, prepared, false).await;
        if self.release_if_settled(&formation.id, object_id)? {
            info!(formation = %formation.id, object = %object_id, "participant unassigned");
        } else {
            warn!(
                formation = %formation.id,
                object = %object_id,
                failed = errors.len(),
                "participant unassign pending, delete notifications unresolved"
            );
        }

        self.post(TargetOperation::UnassignFormation, &ctx)
    }

    // ── Delete ─────────────────────────────────────────────────────

    pub async fn delete_formation(&self, caller: &Caller, name: &str) -> FormationResult<DeleteOutcome> {
        require("name", name)?;
        let store = &self.inner.store;
        let formation = store
            .find_formation_by_name(&caller.tenant_id, name)?
            .ok_or_else(|| FormationError::not_found("formation", name))?;
        let template = self.template_for(&formation)?;
        if !is_leading_product(&template, caller) {
            return Err(FormationError::Forbidden(format!(
                "consumer {} may not delete formations of type {}",
                caller.consumer_id.as_deref().unwrap_or_default(),
                template.name
            )));
        }

        let _guard = self.inner.formation_locks.lock(&formation.id).await;
        let formation = self.reload(&formation.id)?;
        let memberships = store.list_memberships(&formation.id)?;
        if !memberships.is_empty() {
            return Err(FormationError::Conflict(self.still_used_message(&formation, &memberships)?));
        }

        let ctx = ConstraintContext::for_formation(&formation, &template.name);
        self.pre(TargetOperation::DeleteFormation, &ctx)?;

        let outcome = self
            .notify_lifecycle(&formation, &template, LifecycleOperation::DeleteFormation)
            .await?;
        if !outcome.succeeded {
            warn!(formation = %formation.id, error = ?outcome.error, "formation delete notification failed");
            let formation = self.refresh_state(&formation.id)?;
            return Ok(DeleteOutcome {
                formation,
                deleted: false,
                post_denials: Vec::new(),
            });
        }

        self.delete_cascade(&formation)?;
        let post_denials = self.post(TargetOperation::DeleteFormation, &ctx)?;
        Ok(DeleteOutcome {
            formation,
            deleted: true,
            post_denials,
        })
    }

    pub(crate) fn delete_cascade(&self, formation: &Formation) -> FormationResult<()> {
        self.inner.store.delete_formation_cascade(&formation.id)?;
        info!(formation = %formation.id, name = %formation.name, "formation deleted");
        Ok(())
    }

    fn still_used_message(&self, formation: &Formation, memberships: &[Membership]) -> FormationResult<String> {
        let mut systems = Vec::new();
        let mut runtimes = Vec::new();
        for membership in memberships {
            let name = self
                .inner
                .store
                .get_participant(membership.object_type, &membership.object_id)?
                .map(|p| p.name)
                .unwrap_or_else(|| membership.object_id.clone());
            match membership.object_type {
                ObjectType::Application => systems.push(name),
                _ => runtimes.push(name),
            }
        }
        Ok(format!(
            "Formation {} is still used and cannot be deleted. Unassign the following systems first: {}. Then, unassign the following runtimes, too: {}",
            formation.name,
            systems.join(", "),
            runtimes.join(", ")
        ))
    }

    // ── Notification fan-out ───────────────────────────────────────

    /// Notify every assignment in `assignments`, one task per unordered
    /// pair; the two directions of a pair run in the order given.
    pub(crate) async fn dispatch_batch(
        &self,
        formation: &Formation,
        template: &FormationTemplate,
        assignments: Vec<FormationAssignment>,
        reset: bool,
    ) -> NotificationErrors {
        let mut couples: BTreeMap<(String, String), Vec<FormationAssignment>> = BTreeMap::new();
        for assignment in assignments {
            let couple = if assignment.source <= assignment.target {
                (assignment.source.clone(), assignment.target.clone())
            } else {
                (assignment.target.clone(), assignment.source.clone())
            };
            couples.entry(couple).or_default().push(assignment);
        }

        let mut tasks = JoinSet::new();
        for (_, group) in couples {
            let this = self.clone();
            let formation = formation.clone();
            let template_name = template.name.clone();
            tasks.spawn(async move {
                let mut failed = Vec::new();
                for assignment in group {
                    if let Err(message) = this
                        .notify_assignment(&formation, &template_name, &assignment, reset)
                        .await
                    {
                        failed.push((assignment.id.clone(), message));
                    }
                }
                failed
            });
        }

        let mut errors = NotificationErrors::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(failed) => errors.extend(failed),
                Err(e) => error!(formation = %formation.id, error = %e, "notification task panicked"),
            }
        }
        errors
    }

    /// Notify the target of one assignment and persist the outcome. Returns
    /// the error message when the assignment ends in an error state.
    pub(crate) async fn notify_assignment(
        &self,
        formation: &Formation,
        template_name: &str,
        assignment: &FormationAssignment,
        reset: bool,
    ) -> Result<(), String> {
        let store = &self.inner.store;
        let key = assignment.table_key();
        let _guard = self.inner.assignment_locks.lock(&key).await;

        let current = store
            .get_assignment(&formation.id, &assignment.source, &assignment.target)
            .map_err(|e| e.to_string())?;
        let Some(current) = current else {
            debug!(assignment = %key, "assignment vanished before notification");
            return Ok(());
        };

        let result = self.deliver(formation, template_name, &current, reset).await;
        let persisted = match apply_dispatch(&current, &result) {
            Applied::Update(next) => store.put_assignment(&next),
            Applied::Delete => store.delete_assignment(&key).map(|_| ()),
            Applied::NoOp => Ok(()),
        };
        persisted.map_err(|e| e.to_string())?;
        if result.scheduled {
            self.schedule_operation(&current.id).map_err(|e| e.to_string())?;
        }

        if result.state.is_error() {
            Err(result
                .error
                .unwrap_or_else(|| format!("assignment ended in {}", result.state)))
        } else {
            Ok(())
        }
    }

    async fn deliver(
        &self,
        formation: &Formation,
        template_name: &str,
        assignment: &FormationAssignment,
        reset: bool,
    ) -> DispatchResult {
        let operation = assignment.last_operation;
        match self.try_deliver(formation, template_name, assignment, reset).await {
            Ok(result) => result,
            Err(e) => {
                warn!(assignment = %assignment.id, error = %e, "notification could not be prepared");
                DispatchResult::failed(operation, None, e.to_string())
            }
        }
    }

    async fn try_deliver(
        &self,
        formation: &Formation,
        template_name: &str,
        assignment: &FormationAssignment,
        reset: bool,
    ) -> FormationResult<DispatchResult> {
        let store = &self.inner.store;
        let operation = assignment.last_operation;
        let source = load_endpoint(store, assignment.source_type, &assignment.source)?;
        let target = load_endpoint(store, assignment.target_type, &assignment.target)?;
        let (Some(source), Some(target)) = (source, target) else {
            return Ok(match operation {
                AssignmentOperation::Unassign => DispatchResult::ready(),
                AssignmentOperation::Assign => {
                    DispatchResult::failed(operation, None, "participant no longer exists".to_string())
                }
            });
        };

        let constraint_ctx =
            ConstraintContext::for_notification(formation, template_name, &source.participant, &target.participant);
        let verdict = self.inner.constraints.evaluate(
            ConstraintType::Pre,
            TargetOperation::GenerateFormationAssignmentNotification,
            &constraint_ctx,
        )?;
        if !verdict.is_allowed() {
            debug!(assignment = %assignment.id, reason = %verdict.reason(), "notification suppressed");
            return Ok(DispatchResult::ready());
        }

        let Some(webhook) = resolve_webhook(store, &source.participant, &target)? else {
            debug!(assignment = %assignment.id, target = %assignment.target, "target has no webhook");
            return Ok(DispatchResult::ready());
        };

        let reverse = if assignment.is_loop() {
            None
        } else {
            store.get_assignment(&formation.id, &assignment.target, &assignment.source)?
        };
        let ctx = NotificationContext::build(operation, formation, assignment, reverse.as_ref(), &source, &target, reset);
        let timeout = self.inner.config.notification_timeout;
        let result = match tokio::time::timeout(timeout, self.inner.dispatcher.notify(&webhook, &ctx, operation)).await {
            Ok(result) => result,
            Err(_) => DispatchResult::failed(
                operation,
                None,
                format!("notification timed out after {}s", timeout.as_secs()),
            ),
        };

        self.post(TargetOperation::GenerateFormationAssignmentNotification, &constraint_ctx)?;
        Ok(result)
    }

    /// Send the formation template's lifecycle notification, if it has a
    /// lifecycle webhook, and record the outcome on the formation.
    pub(crate) async fn notify_lifecycle(
        &self,
        formation: &Formation,
        template: &FormationTemplate,
        operation: LifecycleOperation,
    ) -> FormationResult<LifecycleOutcome> {
        let outcome = match lifecycle_webhook(&self.inner.store, &template.id)? {
            None => LifecycleOutcome {
                succeeded: true,
                error: None,
            },
            Some(webhook) => {
                let ctx = LifecycleContext::build(operation, formation, template);
                let timeout = self.inner.config.notification_timeout;
                match tokio::time::timeout(timeout, self.inner.dispatcher.notify_lifecycle(&webhook, &ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => LifecycleOutcome {
                        succeeded: false,
                        error: Some(format!("lifecycle notification timed out after {}s", timeout.as_secs())),
                    },
                }
            }
        };

        let state = match (outcome.succeeded, operation) {
            (true, _) => FormationState::Ready,
            (false, LifecycleOperation::CreateFormation) => FormationState::CreateError,
            (false, LifecycleOperation::DeleteFormation) => FormationState::DeleteError,
        };
        let error = outcome.error.clone();
        self.inner.store.update_formation_snapshot(&formation.id, |f, _| {
            f.lifecycle_state = state;
            f.error = error;
            f.updated_at = epoch_secs();
        })?;
        Ok(outcome)
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Recompute and persist the aggregate formation state from a consistent
    /// snapshot of its assignments.
    pub(crate) fn refresh_state(&self, formation_id: &str) -> FormationResult<Formation> {
        self.inner
            .store
            .update_formation_snapshot(formation_id, |formation, assignments| {
                let state = aggregate_state(formation.lifecycle_state, assignments);
                if state != formation.state {
                    debug!(formation = %formation.id, from = ?formation.state, to = ?state, "formation state changed");
                }
                formation.state = state;
                formation.updated_at = epoch_secs();
            })?
            .ok_or_else(|| FormationError::not_found("formation", formation_id))
    }

    pub(crate) fn reload(&self, formation_id: &str) -> FormationResult<Formation> {
        self.inner
            .store
            .get_formation(formation_id)?
            .ok_or_else(|| FormationError::not_found("formation", formation_id))
    }

    pub(crate) fn template_for(&self, formation: &Formation) -> FormationResult<FormationTemplate> {
        self.inner
            .store
            .get_formation_template(&formation.formation_template_id)?
            .ok_or_else(|| FormationError::not_found("formation template", &formation.formation_template_id))
    }

    /// Resolve a formation template by ID or name, as visible to the caller.
    fn resolve_template(&self, caller: &Caller, reference: &str) -> FormationResult<FormationTemplate> {
        let store = &self.inner.store;
        let template = match store.get_formation_template(reference)? {
            Some(template) => Some(template),
            None => store.find_formation_template_by_name(reference)?,
        };
        template
            .filter(|t| t.visible_to(&caller.tenant_id))
            .ok_or_else(|| FormationError::not_found("formation template", reference))
    }

    fn participant_context(
        &self,
        formation: &Formation,
        template: &FormationTemplate,
        participant: &Participant,
    ) -> FormationResult<ConstraintContext> {
        let store = &self.inner.store;
        let mut template_ids = Vec::new();
        for membership in store.list_memberships_for_object(&participant.id)? {
            if membership.formation_id == formation.id {
                continue;
            }
            if let Some(other) = store.get_formation(&membership.formation_id)? {
                template_ids.push(other.formation_template_id);
            }
        }

        let mut members = Vec::new();
        for membership in store.list_memberships(&formation.id)? {
            let subtype = store
                .get_participant(membership.object_type, &membership.object_id)?
                .map(|p| p.subtype)
                .unwrap_or_default();
            members.push(MemberFact {
                id: membership.object_id,
                object_type: membership.object_type,
                subtype,
            });
        }

        Ok(ConstraintContext::for_participant(formation, &template.name, participant)
            .with_assigned_template_ids(template_ids)
            .with_members(members))
    }

    /// Evaluate PRE constraints; a denial aborts the operation.
    pub(crate) fn pre(&self, operation: TargetOperation, ctx: &ConstraintContext) -> FormationResult<()> {
        let verdict = self.inner.constraints.evaluate(ConstraintType::Pre, operation, ctx)?;
        if verdict.is_allowed() {
            Ok(())
        } else {
            Err(FormationError::ConstraintDenied(verdict.reason()))
        }
    }

    /// Evaluate POST constraints; denials are reported, never rolled back.
    pub(crate) fn post(&self, operation: TargetOperation, ctx: &ConstraintContext) -> FormationResult<Vec<Denial>> {
        let verdict = self.inner.constraints.evaluate(ConstraintType::Post, operation, ctx)?;
        for denial in &verdict.denials {
            warn!(
                formation = %ctx.formation_id,
                %operation,
                constraint = %denial.constraint_name,
                reason = %denial.reason,
                "post constraint denied completed operation"
            );
        }
        Ok(verdict.denials)
    }

    /// Drop the membership of `object_id` once none of its rows remain.
    pub(crate) fn release_if_settled(&self, formation_id: &str, object_id: &str) -> StateResult<bool> {
        let store = &self.inner.store;
        let remaining = store
            .list_assignments(formation_id)?
            .iter()
            .any(|a| a.involves(object_id));
        if remaining {
            return Ok(false);
        }
        store.delete_membership(formation_id, object_id)?;
        Ok(true)
    }

    /// Release every pending-unassign member of a formation whose rows are
    /// all gone.
    pub(crate) fn release_pending(&self, formation_id: &str) -> StateResult<()> {
        for membership in self.inner.store.list_memberships(formation_id)? {
            if membership.pending_unassign && self.release_if_settled(formation_id, &membership.object_id)? {
                info!(formation = %formation_id, object = %membership.object_id, "participant unassigned");
            }
        }
        Ok(())
    }

    fn schedule_operation(&self, assignment_id: &str) -> StateResult<()> {
        let now = epoch_secs();
        let operation = Operation {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type: OperationType::AssignmentNotification,
            status: OperationStatus::Scheduled,
            resource_id: assignment_id.to_string(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.store.put_operation(&operation)?;
        debug!(operation = %operation.id, assignment = %assignment_id, "async notification scheduled");
        Ok(())
    }

    /// Complete (no error) or fail the scheduled notification operations of
    /// an assignment.
    pub(crate) fn finish_operations(&self, assignment_id: &str, error: Option<String>) -> StateResult<()> {
        let store = &self.inner.store;
        for mut operation in store.list_operations_for_resource(assignment_id)? {
            if operation.status != OperationStatus::Scheduled
                || operation.operation_type != OperationType::AssignmentNotification
            {
                continue;
            }
            operation.status = if error.is_some() {
                OperationStatus::Failed
            } else {
                OperationStatus::Completed
            };
            operation.error = error.clone();
            operation.updated_at = epoch_secs();
            store.put_operation(&operation)?;
        }
        Ok(())
    }
}

/// Reject blank required fields with a field-qualified message.
pub(crate) fn require(field: &str, value: &str) -> FormationResult<()> {
    if value.trim().is_empty() {
        return Err(FormationError::Validation(format!("{field}=cannot be blank")));
    }
    Ok(())
}

fn name_key(tenant_id: &str, name: &str) -> String {
    format!("{tenant_id}/{name}")
}

pub(crate) fn kind_name(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Application => "application",
        ObjectType::Runtime => "runtime",
        ObjectType::RuntimeContext => "runtime context",
        ObjectType::Tenant => "tenant",
    }
}

/// Stand-in for a member whose participant record is gone.
fn detached_participant(membership: &Membership) -> Participant {
    Participant {
        id: membership.object_id.clone(),
        object_type: membership.object_type,
        name: membership.object_id.clone(),
        subtype: String::new(),
        labels: Default::default(),
        application_template_id: None,
        parent_id: None,
        owner_tenant_id: None,
    }
}

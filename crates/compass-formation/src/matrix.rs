//! Participant matrix and aggregate formation state.
//!
//! Every ordered pair of co-members gets one assignment (source notifies
//! target). A formation with a single notifiable member holds that member's
//! loop assignment; the loop is dropped once a second member joins and is
//! not recreated when the formation shrinks back to one member. Tenants are
//! members without assignments.

use compass_state::{
    AssignmentOperation, AssignmentState, FormationAssignment, FormationState, Membership,
    ObjectType, epoch_secs,
};

/// One endpoint of an assignment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub object_type: ObjectType,
}

impl Member {
    pub fn new(id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            id: id.into(),
            object_type,
        }
    }

    /// Whether this member takes part in notifications.
    pub fn is_notifiable(&self) -> bool {
        self.object_type != ObjectType::Tenant
    }
}

impl From<&Membership> for Member {
    fn from(m: &Membership) -> Self {
        Self::new(m.object_id.clone(), m.object_type)
    }
}

/// Ordered pairs to create when `joining` enters a formation whose current
/// members are `existing` (which must not contain `joining`).
///
/// For each co-member the pair towards the existing member comes first, so
/// the reverse assignment exists by the time the joining member is notified.
pub fn pairs_for_join(existing: &[Member], joining: &Member) -> Vec<(Member, Member)> {
    if !joining.is_notifiable() {
        return Vec::new();
    }
    let others: Vec<&Member> = existing
        .iter()
        .filter(|m| m.is_notifiable() && m.id != joining.id)
        .collect();
    if others.is_empty() {
        return vec![(joining.clone(), joining.clone())];
    }
    others
        .into_iter()
        .flat_map(|other| [(joining.clone(), other.clone()), (other.clone(), joining.clone())])
        .collect()
}

/// A fresh INITIAL assignment for an ordered pair.
pub fn new_assignment(formation_id: &str, source: &Member, target: &Member) -> FormationAssignment {
    let now = epoch_secs();
    FormationAssignment {
        id: uuid::Uuid::new_v4().to_string(),
        formation_id: formation_id.to_string(),
        source: source.id.clone(),
        source_type: source.object_type,
        target: target.id.clone(),
        target_type: target.object_type,
        state: AssignmentState::Initial,
        value: None,
        config: None,
        error: None,
        last_operation: AssignmentOperation::Assign,
        created_at: now,
        updated_at: now,
    }
}

/// Aggregate formation state: CREATE_ERROR > DELETE_ERROR > in progress >
/// READY. The formation's own lifecycle notification counts like one more
/// assignment.
pub fn aggregate_state(lifecycle: FormationState, assignments: &[FormationAssignment]) -> FormationState {
    let any = |state: AssignmentState| assignments.iter().any(|a| a.state == state);

    if lifecycle == FormationState::CreateError || any(AssignmentState::CreateError) {
        FormationState::CreateError
    } else if lifecycle == FormationState::DeleteError || any(AssignmentState::DeleteError) {
        FormationState::DeleteError
    } else if lifecycle == FormationState::Initial
        || assignments.iter().any(|a| a.state != AssignmentState::Ready)
    {
        FormationState::Initial
    } else {
        FormationState::Ready
    }
}

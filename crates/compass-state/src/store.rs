//! StateStore — redb-backed state persistence for the formation engine.
//!
//! Provides typed CRUD operations over every formation-engine record. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|source| StateError::Open {
            location: path.display().to_string(),
            source,
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|source| StateError::Open {
                location: "memory".to_string(),
                source,
            })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            FORMATIONS,
            FORMATION_TEMPLATES,
            PARTICIPANTS,
            APPLICATION_TEMPLATES,
            MEMBERSHIPS,
            ASSIGNMENTS,
            WEBHOOKS,
            CONSTRAINTS,
            CONSTRAINT_ATTACHMENTS,
            OPERATIONS,
        ] {
            txn.open_table(table)?;
        }
        txn.commit()?;
        Ok(())
    }

    // ── Generic table access ───────────────────────────────────────

    fn put<T: Serialize>(&self, table: JsonTable, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(StateError::Encode)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table)?;
            table
                .insert(key, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        match table.get(key)? {
            Some(guard) => {
                let record: T = serde_json::from_slice(guard.value()).map_err(|source| StateError::Decode {
                    key: key.to_string(),
                    source,
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List every record whose key starts with `prefix` (all records for "").
    fn list_prefix<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        scan_prefix(&table, prefix)
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(table)?;
            existed = table.remove(key)?.is_some();
        }
        txn.commit()?;
        Ok(existed)
    }

    // ── Formations ─────────────────────────────────────────────────

    /// Insert or update a formation.
    pub fn put_formation(&self, formation: &Formation) -> StateResult<()> {
        self.put(FORMATIONS, &formation.id, formation)?;
        debug!(formation = %formation.id, state = ?formation.state, "formation stored");
        Ok(())
    }

    /// Get a formation by ID.
    pub fn get_formation(&self, id: &str) -> StateResult<Option<Formation>> {
        self.get(FORMATIONS, id)
    }

    /// Find a tenant's formation by name.
    pub fn find_formation_by_name(&self, tenant_id: &str, name: &str) -> StateResult<Option<Formation>> {
        Ok(self
            .list_formations(Some(tenant_id))?
            .into_iter()
            .find(|f| f.name == name))
    }

    /// List formations, optionally restricted to one tenant.
    pub fn list_formations(&self, tenant_id: Option<&str>) -> StateResult<Vec<Formation>> {
        let all: Vec<Formation> = self.list_prefix(FORMATIONS, "")?;
        Ok(match tenant_id {
            Some(tenant) => all.into_iter().filter(|f| f.tenant_id == tenant).collect(),
            None => all,
        })
    }

    /// List formations created from a template.
    pub fn list_formations_for_template(&self, template_id: &str) -> StateResult<Vec<Formation>> {
        Ok(self
            .list_formations(None)?
            .into_iter()
            .filter(|f| f.formation_template_id == template_id)
            .collect())
    }

    /// Delete a formation together with its memberships and assignments.
    /// Returns true if the formation existed.
    pub fn delete_formation_cascade(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}/");
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut formations = txn.open_table(FORMATIONS)?;
            existed = formations.remove(id)?.is_some();

            let mut memberships = txn.open_table(MEMBERSHIPS)?;
            remove_prefix(&mut memberships, &prefix)?;

            let mut assignments = txn.open_table(ASSIGNMENTS)?;
            remove_prefix(&mut assignments, &prefix)?;
        }
        txn.commit()?;
        debug!(formation = %id, existed, "formation deleted");
        Ok(existed)
    }

    /// Read a formation and all of its assignments in one write transaction,
    /// let `update` modify the formation, and persist it.
    ///
    /// The assignments observed by `update` are a consistent snapshot: no
    /// other writer can interleave until the transaction commits.
    pub fn update_formation_snapshot<F>(&self, id: &str, update: F) -> StateResult<Option<Formation>>
    where
        F: FnOnce(&mut Formation, &[FormationAssignment]),
    {
        let prefix = format!("{id}/");
        let txn = self.db.begin_write()?;
        let result;
        {
            let mut formations = txn.open_table(FORMATIONS)?;
            let current: Option<Formation> = match formations.get(id)? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(|source| StateError::Decode {
                        key: id.to_string(),
                        source,
                    })?,
                ),
                None => None,
            };
            result = match current {
                Some(mut formation) => {
                    let assignments_table = txn.open_table(ASSIGNMENTS)?;
                    let assignments: Vec<FormationAssignment> =
                        scan_prefix(&assignments_table, &prefix)?;
                    update(&mut formation, &assignments);
                    let value = serde_json::to_vec(&formation).map_err(StateError::Encode)?;
                    formations
                        .insert(id, value.as_slice())?;
                    Some(formation)
                }
                None => None,
            };
        }
        txn.commit()?;
        Ok(result)
    }

    // ── Formation templates ────────────────────────────────────────

    /// Insert or update a formation template.
    pub fn put_formation_template(&self, template: &FormationTemplate) -> StateResult<()> {
        self.put(FORMATION_TEMPLATES, &template.id, template)?;
        debug!(template = %template.id, name = %template.name, "formation template stored");
        Ok(())
    }

    /// Get a formation template by ID.
    pub fn get_formation_template(&self, id: &str) -> StateResult<Option<FormationTemplate>> {
        self.get(FORMATION_TEMPLATES, id)
    }

    /// Find a formation template by name.
    pub fn find_formation_template_by_name(&self, name: &str) -> StateResult<Option<FormationTemplate>> {
        Ok(self
            .list_formation_templates()?
            .into_iter()
            .find(|t| t.name == name))
    }

    /// List all formation templates.
    pub fn list_formation_templates(&self) -> StateResult<Vec<FormationTemplate>> {
        self.list_prefix(FORMATION_TEMPLATES, "")
    }

    /// Delete a formation template and its constraint attachments. The
    /// constraints themselves are left untouched.
    pub fn delete_formation_template(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}/");
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut templates = txn.open_table(FORMATION_TEMPLATES)?;
            existed = templates.remove(id)?.is_some();

            let mut attachments = txn
                .open_table(CONSTRAINT_ATTACHMENTS)?;
            remove_prefix(&mut attachments, &prefix)?;
        }
        txn.commit()?;
        debug!(template = %id, existed, "formation template deleted");
        Ok(existed)
    }

    // ── Participants ───────────────────────────────────────────────

    /// Insert or update a participant registration.
    pub fn put_participant(&self, participant: &Participant) -> StateResult<()> {
        self.put(PARTICIPANTS, &participant.table_key(), participant)
    }

    /// Get a participant by type and ID.
    pub fn get_participant(&self, object_type: ObjectType, id: &str) -> StateResult<Option<Participant>> {
        self.get(PARTICIPANTS, &participant_key(object_type, id))
    }

    /// List registered participants of one type.
    pub fn list_participants(&self, object_type: ObjectType) -> StateResult<Vec<Participant>> {
        self.list_prefix(PARTICIPANTS, &format!("{object_type}/"))
    }

    /// Delete a participant registration. Returns true if it existed.
    pub fn delete_participant(&self, object_type: ObjectType, id: &str) -> StateResult<bool> {
        self.remove(PARTICIPANTS, &participant_key(object_type, id))
    }

    // ── Application templates ──────────────────────────────────────

    /// Insert or update an application template.
    pub fn put_application_template(&self, template: &ApplicationTemplate) -> StateResult<()> {
        self.put(APPLICATION_TEMPLATES, &template.id, template)
    }

    /// Get an application template by ID.
    pub fn get_application_template(&self, id: &str) -> StateResult<Option<ApplicationTemplate>> {
        self.get(APPLICATION_TEMPLATES, id)
    }

    // ── Memberships ────────────────────────────────────────────────

    /// Insert or update a formation membership.
    pub fn put_membership(&self, membership: &Membership) -> StateResult<()> {
        self.put(MEMBERSHIPS, &membership.table_key(), membership)
    }

    /// Get one participant's membership in a formation.
    pub fn get_membership(&self, formation_id: &str, object_id: &str) -> StateResult<Option<Membership>> {
        self.get(MEMBERSHIPS, &format!("{formation_id}/{object_id}"))
    }

    /// List all memberships of a formation.
    pub fn list_memberships(&self, formation_id: &str) -> StateResult<Vec<Membership>> {
        self.list_prefix(MEMBERSHIPS, &format!("{formation_id}/"))
    }

    /// List every formation membership held by an object.
    pub fn list_memberships_for_object(&self, object_id: &str) -> StateResult<Vec<Membership>> {
        let all: Vec<Membership> = self.list_prefix(MEMBERSHIPS, "")?;
        Ok(all.into_iter().filter(|m| m.object_id == object_id).collect())
    }

    /// Delete a membership. Returns true if it existed.
    pub fn delete_membership(&self, formation_id: &str, object_id: &str) -> StateResult<bool> {
        self.remove(MEMBERSHIPS, &format!("{formation_id}/{object_id}"))
    }

    // ── Formation assignments ──────────────────────────────────────

    /// Insert or update a formation assignment.
    pub fn put_assignment(&self, assignment: &FormationAssignment) -> StateResult<()> {
        self.put(ASSIGNMENTS, &assignment.table_key(), assignment)?;
        debug!(
            assignment = %assignment.id,
            source = %assignment.source,
            target = %assignment.target,
            state = %assignment.state,
            "assignment stored"
        );
        Ok(())
    }

    /// Insert or update several assignments in one transaction.
    pub fn put_assignments(&self, assignments: &[FormationAssignment]) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ASSIGNMENTS)?;
            for assignment in assignments {
                let value = serde_json::to_vec(assignment).map_err(StateError::Encode)?;
                table
                    .insert(assignment.table_key().as_str(), value.as_slice())?;
            }
        }
        txn.commit()?;
        debug!(count = assignments.len(), "assignments stored");
        Ok(())
    }

    /// Get the assignment for an ordered (source, target) pair.
    pub fn get_assignment(
        &self,
        formation_id: &str,
        source: &str,
        target: &str,
    ) -> StateResult<Option<FormationAssignment>> {
        self.get(ASSIGNMENTS, &assignment_key(formation_id, source, target))
    }

    /// Find an assignment of a formation by its ID.
    pub fn find_assignment(&self, formation_id: &str, id: &str) -> StateResult<Option<FormationAssignment>> {
        Ok(self
            .list_assignments(formation_id)?
            .into_iter()
            .find(|a| a.id == id))
    }

    /// List all assignments of a formation.
    pub fn list_assignments(&self, formation_id: &str) -> StateResult<Vec<FormationAssignment>> {
        self.list_prefix(ASSIGNMENTS, &format!("{formation_id}/"))
    }

    /// List every assignment in the store.
    pub fn list_all_assignments(&self) -> StateResult<Vec<FormationAssignment>> {
        self.list_prefix(ASSIGNMENTS, "")
    }

    /// Delete an assignment by its composite key. Returns true if it existed.
    pub fn delete_assignment(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove(ASSIGNMENTS, key)?;
        debug!(%key, existed, "assignment deleted");
        Ok(existed)
    }

    // ── Webhooks ───────────────────────────────────────────────────

    /// Insert or update a webhook.
    pub fn put_webhook(&self, webhook: &Webhook) -> StateResult<()> {
        self.put(WEBHOOKS, &webhook.table_key(), webhook)
    }

    /// List the webhooks owned by an object.
    pub fn list_webhooks_for_owner(&self, owner_id: &str) -> StateResult<Vec<Webhook>> {
        self.list_prefix(WEBHOOKS, &format!("{owner_id}/"))
    }

    /// Delete a webhook. Returns true if it existed.
    pub fn delete_webhook(&self, owner_id: &str, id: &str) -> StateResult<bool> {
        self.remove(WEBHOOKS, &format!("{owner_id}/{id}"))
    }

    // ── Constraints ────────────────────────────────────────────────

    /// Insert or update a formation constraint.
    pub fn put_constraint(&self, constraint: &FormationConstraint) -> StateResult<()> {
        self.put(CONSTRAINTS, &constraint.id, constraint)?;
        debug!(constraint = %constraint.id, name = %constraint.name, "constraint stored");
        Ok(())
    }

    /// Get a constraint by ID.
    pub fn get_constraint(&self, id: &str) -> StateResult<Option<FormationConstraint>> {
        self.get(CONSTRAINTS, id)
    }

    /// List all constraints.
    pub fn list_constraints(&self) -> StateResult<Vec<FormationConstraint>> {
        self.list_prefix(CONSTRAINTS, "")
    }

    /// Delete a constraint and every attachment referencing it.
    pub fn delete_constraint(&self, id: &str) -> StateResult<bool> {
        let suffix = format!("/{id}");
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut constraints = txn.open_table(CONSTRAINTS)?;
            existed = constraints.remove(id)?.is_some();

            let mut attachments = txn
                .open_table(CONSTRAINT_ATTACHMENTS)?;
            let keys: Vec<String> = attachments
                .iter()?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.ends_with(&suffix).then_some(k)
                })
                .collect();
            for key in &keys {
                attachments.remove(key.as_str())?;
            }
        }
        txn.commit()?;
        debug!(constraint = %id, existed, "constraint deleted");
        Ok(existed)
    }

    /// Attach a constraint to a formation template.
    pub fn put_attachment(&self, attachment: &ConstraintAttachment) -> StateResult<()> {
        self.put(CONSTRAINT_ATTACHMENTS, &attachment.table_key(), attachment)
    }

    /// Detach a constraint from a formation template. Returns true if it was attached.
    pub fn delete_attachment(&self, template_id: &str, constraint_id: &str) -> StateResult<bool> {
        self.remove(CONSTRAINT_ATTACHMENTS, &format!("{template_id}/{constraint_id}"))
    }

    /// List the constraint attachments of a formation template.
    pub fn list_attachments_for_template(&self, template_id: &str) -> StateResult<Vec<ConstraintAttachment>> {
        self.list_prefix(CONSTRAINT_ATTACHMENTS, &format!("{template_id}/"))
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Insert or update an operation.
    pub fn put_operation(&self, operation: &Operation) -> StateResult<()> {
        self.put(OPERATIONS, &operation.id, operation)
    }

    /// Get an operation by ID.
    pub fn get_operation(&self, id: &str) -> StateResult<Option<Operation>> {
        self.get(OPERATIONS, id)
    }

    /// List the operations working on a resource.
    pub fn list_operations_for_resource(&self, resource_id: &str) -> StateResult<Vec<Operation>> {
        let all: Vec<Operation> = self.list_prefix(OPERATIONS, "")?;
        Ok(all
            .into_iter()
            .filter(|op| op.resource_id == resource_id)
            .collect())
    }
}

/// Collect and decode every value whose key starts with `prefix`.
fn scan_prefix<T, R>(table: &R, prefix: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        let record: T = serde_json::from_slice(value.value()).map_err(|source| StateError::Decode {
            key: key.value().to_string(),
            source,
        })?;
        results.push(record);
    }
    Ok(results)
}

/// Remove every entry whose key starts with `prefix`. Returns number removed.
fn remove_prefix(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<u32> {
    // Collect keys first; the range borrow must end before removal.
    let keys: Vec<String> = {
        let mut keys = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, _) = entry?;
            let k = key.value().to_string();
            if !k.starts_with(prefix) {
                break;
            }
            keys.push(k);
        }
        keys
    };
    for key in &keys {
        table.remove(key.as_str())?;
    }
    Ok(keys.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_formation(id: &str, tenant: &str, name: &str) -> Formation {
        Formation {
            id: id.to_string(),
            name: name.to_string(),
            formation_template_id: "tpl-1".to_string(),
            tenant_id: tenant.to_string(),
            state: FormationState::Initial,
            lifecycle_state: FormationState::Ready,
            error: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_assignment(formation_id: &str, source: &str, target: &str) -> FormationAssignment {
        FormationAssignment {
            id: format!("fa-{source}-{target}"),
            formation_id: formation_id.to_string(),
            source: source.to_string(),
            source_type: ObjectType::Application,
            target: target.to_string(),
            target_type: ObjectType::Runtime,
            state: AssignmentState::Initial,
            value: None,
            config: None,
            error: None,
            last_operation: AssignmentOperation::Assign,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_membership(formation_id: &str, object_id: &str) -> Membership {
        Membership {
            formation_id: formation_id.to_string(),
            object_id: object_id.to_string(),
            object_type: ObjectType::Application,
            assigned_via: None,
            pending_unassign: false,
            created_at: 1000,
        }
    }

    fn test_constraint(id: &str, scope: ConstraintScope) -> FormationConstraint {
        FormationConstraint {
            id: id.to_string(),
            name: format!("constraint-{id}"),
            constraint_type: ConstraintType::Pre,
            target_operation: TargetOperation::AssignFormation,
            operator: "IsNotAssignedToAnyFormationOfType".to_string(),
            resource_type: ObjectType::Tenant,
            resource_subtype: "*".to_string(),
            input_template: String::new(),
            constraint_scope: scope,
            created_at: 1000,
        }
    }

    // ── Formation CRUD ─────────────────────────────────────────────

    #[test]
    fn formation_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let formation = test_formation("f1", "tenant-a", "test");

        store.put_formation(&formation).unwrap();
        assert_eq!(store.get_formation("f1").unwrap(), Some(formation));
        assert!(store.get_formation("nope").unwrap().is_none());
    }

    #[test]
    fn formation_lookup_by_name_is_tenant_scoped() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_formation(&test_formation("f1", "tenant-a", "test")).unwrap();
        store.put_formation(&test_formation("f2", "tenant-b", "test")).unwrap();

        let found = store.find_formation_by_name("tenant-b", "test").unwrap().unwrap();
        assert_eq!(found.id, "f2");
        assert!(store.find_formation_by_name("tenant-c", "test").unwrap().is_none());
        assert_eq!(store.list_formations(None).unwrap().len(), 2);
    }

    #[test]
    fn formation_cascade_delete_removes_children() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_formation(&test_formation("f1", "t", "a")).unwrap();
        store.put_formation(&test_formation("f2", "t", "b")).unwrap();
        store.put_membership(&test_membership("f1", "app-1")).unwrap();
        store.put_membership(&test_membership("f2", "app-1")).unwrap();
        store.put_assignment(&test_assignment("f1", "app-1", "rt-1")).unwrap();
        store.put_assignment(&test_assignment("f2", "app-1", "rt-1")).unwrap();

        assert!(store.delete_formation_cascade("f1").unwrap());
        assert!(!store.delete_formation_cascade("f1").unwrap());

        assert!(store.list_memberships("f1").unwrap().is_empty());
        assert!(store.list_assignments("f1").unwrap().is_empty());
        // f2 untouched
        assert_eq!(store.list_memberships("f2").unwrap().len(), 1);
        assert_eq!(store.list_assignments("f2").unwrap().len(), 1);
    }

    #[test]
    fn snapshot_update_sees_all_assignments() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_formation(&test_formation("f1", "t", "a")).unwrap();
        let mut ready = test_assignment("f1", "app-1", "rt-1");
        ready.state = AssignmentState::Ready;
        store
            .put_assignments(&[ready, test_assignment("f1", "rt-1", "app-1")])
            .unwrap();

        let updated = store
            .update_formation_snapshot("f1", |formation, assignments| {
                assert_eq!(assignments.len(), 2);
                formation.state = FormationState::Ready;
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, FormationState::Ready);
        assert_eq!(store.get_formation("f1").unwrap().unwrap().state, FormationState::Ready);

        assert!(store
            .update_formation_snapshot("missing", |_, _| {})
            .unwrap()
            .is_none());
    }

    // ── Assignment CRUD ────────────────────────────────────────────

    #[test]
    fn assignment_prefix_scan_does_not_leak_across_formations() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_assignment(&test_assignment("f1", "a", "b")).unwrap();
        store.put_assignment(&test_assignment("f1", "b", "a")).unwrap();
        store.put_assignment(&test_assignment("f10", "a", "b")).unwrap();

        assert_eq!(store.list_assignments("f1").unwrap().len(), 2);
        assert_eq!(store.list_assignments("f10").unwrap().len(), 1);
        assert_eq!(store.list_all_assignments().unwrap().len(), 3);
    }

    #[test]
    fn assignment_find_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let assignment = test_assignment("f1", "a", "b");
        store.put_assignment(&assignment).unwrap();

        let found = store.find_assignment("f1", "fa-a-b").unwrap();
        assert_eq!(found, Some(assignment.clone()));
        assert_eq!(store.get_assignment("f1", "a", "b").unwrap(), Some(assignment.clone()));

        assert!(store.delete_assignment(&assignment.table_key()).unwrap());
        assert!(store.find_assignment("f1", "fa-a-b").unwrap().is_none());
    }

    // ── Participants and memberships ───────────────────────────────

    #[test]
    fn participant_keys_are_type_scoped() {
        let store = StateStore::open_in_memory().unwrap();
        let app = Participant {
            id: "same-id".to_string(),
            object_type: ObjectType::Application,
            name: "wordpress".to_string(),
            subtype: "cms".to_string(),
            labels: BTreeMap::new(),
            application_template_id: None,
            parent_id: None,
            owner_tenant_id: None,
        };
        let runtime = Participant {
            object_type: ObjectType::Runtime,
            name: "test-runtime".to_string(),
            subtype: "kyma".to_string(),
            ..app.clone()
        };
        store.put_participant(&app).unwrap();
        store.put_participant(&runtime).unwrap();

        let got = store.get_participant(ObjectType::Runtime, "same-id").unwrap().unwrap();
        assert_eq!(got.name, "test-runtime");
        assert_eq!(store.list_participants(ObjectType::Application).unwrap().len(), 1);
        assert!(store.delete_participant(ObjectType::Application, "same-id").unwrap());
        assert!(store.get_participant(ObjectType::Application, "same-id").unwrap().is_none());
    }

    #[test]
    fn memberships_for_object_span_formations() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_membership(&test_membership("f1", "app-1")).unwrap();
        store.put_membership(&test_membership("f2", "app-1")).unwrap();
        store.put_membership(&test_membership("f2", "app-2")).unwrap();

        assert_eq!(store.list_memberships_for_object("app-1").unwrap().len(), 2);
        assert_eq!(store.list_memberships("f2").unwrap().len(), 2);
        assert!(store.delete_membership("f2", "app-2").unwrap());
        assert!(store.get_membership("f2", "app-2").unwrap().is_none());
    }

    // ── Constraints ────────────────────────────────────────────────

    #[test]
    fn deleting_template_keeps_constraints() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_constraint(&test_constraint("c1", ConstraintScope::Global)).unwrap();
        store.put_constraint(&test_constraint("c2", ConstraintScope::FormationType)).unwrap();
        store
            .put_attachment(&ConstraintAttachment {
                constraint_id: "c2".to_string(),
                formation_template_id: "tpl-1".to_string(),
            })
            .unwrap();

        store.delete_formation_template("tpl-1").unwrap();

        assert_eq!(store.list_constraints().unwrap().len(), 2);
        assert!(store.list_attachments_for_template("tpl-1").unwrap().is_empty());
    }

    #[test]
    fn deleting_constraint_removes_its_attachments() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_constraint(&test_constraint("c1", ConstraintScope::FormationType)).unwrap();
        for template in ["tpl-1", "tpl-2"] {
            store
                .put_attachment(&ConstraintAttachment {
                    constraint_id: "c1".to_string(),
                    formation_template_id: template.to_string(),
                })
                .unwrap();
        }

        assert!(store.delete_constraint("c1").unwrap());
        assert!(store.list_attachments_for_template("tpl-1").unwrap().is_empty());
        assert!(store.list_attachments_for_template("tpl-2").unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_formation(&test_formation("f1", "t", "prod")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let formation = store.get_formation("f1").unwrap();
        assert!(formation.is_some());
        assert_eq!(formation.unwrap().name, "prod");
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_formations(None).unwrap().is_empty());
        assert!(store.list_formation_templates().unwrap().is_empty());
        assert!(store.list_assignments("any").unwrap().is_empty());
        assert!(store.list_webhooks_for_owner("any").unwrap().is_empty());
        assert!(!store.delete_formation_cascade("nope").unwrap());
        assert!(!store.delete_assignment("nope").unwrap());
        assert!(!store.delete_attachment("tpl", "c").unwrap());
    }

    #[test]
    fn corrupt_record_names_its_key() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(FORMATIONS).unwrap();
            table.insert("f1", b"not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let err = store.get_formation("f1").unwrap_err();
        assert!(matches!(err, StateError::Decode { ref key, .. } if key == "f1"));
        let err = store.list_formations(None).unwrap_err();
        assert!(matches!(err, StateError::Decode { ref key, .. } if key == "f1"));
    }

    #[test]
    fn open_reports_location() {
        let dir = tempfile::tempdir().unwrap();
        // A directory is not a database file.
        let err = StateStore::open(dir.path()).err().unwrap();
        assert!(matches!(err, StateError::Open { ref location, .. } if location == &dir.path().display().to_string()));
    }
}

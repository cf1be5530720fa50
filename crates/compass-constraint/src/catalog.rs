//! Constraint catalog — create, update, delete, attach and detach constraints.

use compass_state::{
    ConstraintAttachment, ConstraintScope, ConstraintType, FormationConstraint, ObjectType,
    StateStore, TargetOperation, epoch_secs,
};
use compass_template::Template;
use serde::Deserialize;
use tracing::info;

use crate::error::{ConstraintError, ConstraintResult};
use crate::operator::OperatorKind;

/// Fields supplied when creating a constraint.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintInput {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub target_operation: TargetOperation,
    pub operator: String,
    pub resource_type: ObjectType,
    pub resource_subtype: String,
    #[serde(default)]
    pub input_template: String,
    pub constraint_scope: ConstraintScope,
}

/// Mutable fields of an existing constraint; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConstraintUpdate {
    pub name: Option<String>,
    pub operator: Option<String>,
    pub input_template: Option<String>,
    pub resource_type: Option<ObjectType>,
    pub resource_subtype: Option<String>,
    pub constraint_type: Option<ConstraintType>,
    pub target_operation: Option<TargetOperation>,
}

/// Store-backed constraint management.
#[derive(Clone)]
pub struct ConstraintCatalog {
    store: StateStore,
}

impl ConstraintCatalog {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Validate and persist a new constraint.
    pub fn create(&self, input: ConstraintInput) -> ConstraintResult<FormationConstraint> {
        let constraint = FormationConstraint {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            constraint_type: input.constraint_type,
            target_operation: input.target_operation,
            operator: input.operator,
            resource_type: input.resource_type,
            resource_subtype: input.resource_subtype,
            input_template: input.input_template,
            constraint_scope: input.constraint_scope,
            created_at: epoch_secs(),
        };
        validate(&constraint)?;
        self.store.put_constraint(&constraint)?;
        info!(constraint = %constraint.id, name = %constraint.name, operator = %constraint.operator, "constraint created");
        Ok(constraint)
    }

    /// Apply an update to an existing constraint.
    pub fn update(&self, id: &str, update: ConstraintUpdate) -> ConstraintResult<FormationConstraint> {
        let mut constraint = self.get(id)?;
        if let Some(name) = update.name {
            constraint.name = name;
        }
        if let Some(operator) = update.operator {
            constraint.operator = operator;
        }
        if let Some(input_template) = update.input_template {
            constraint.input_template = input_template;
        }
        if let Some(resource_type) = update.resource_type {
            constraint.resource_type = resource_type;
        }
        if let Some(resource_subtype) = update.resource_subtype {
            constraint.resource_subtype = resource_subtype;
        }
        if let Some(constraint_type) = update.constraint_type {
            constraint.constraint_type = constraint_type;
        }
        if let Some(target_operation) = update.target_operation {
            constraint.target_operation = target_operation;
        }
        validate(&constraint)?;
        self.store.put_constraint(&constraint)?;
        info!(constraint = %id, "constraint updated");
        Ok(constraint)
    }

    pub fn get(&self, id: &str) -> ConstraintResult<FormationConstraint> {
        self.store
            .get_constraint(id)?
            .ok_or_else(|| ConstraintError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> ConstraintResult<Vec<FormationConstraint>> {
        Ok(self.store.list_constraints()?)
    }

    /// Delete a constraint and detach it from every template.
    pub fn delete(&self, id: &str) -> ConstraintResult<FormationConstraint> {
        let constraint = self.get(id)?;
        self.store.delete_constraint(id)?;
        info!(constraint = %id, "constraint deleted");
        Ok(constraint)
    }

    /// Attach a formation-type constraint to a formation template.
    pub fn attach(&self, constraint_id: &str, template_id: &str) -> ConstraintResult<ConstraintAttachment> {
        let constraint = self.get(constraint_id)?;
        if constraint.constraint_scope == ConstraintScope::Global {
            return Err(ConstraintError::Validation(format!(
                "constraint_scope=constraint {} is global and applies to every formation template",
                constraint.name
            )));
        }
        if self.store.get_formation_template(template_id)?.is_none() {
            return Err(ConstraintError::NotFound(format!("formation template {template_id}")));
        }
        let attachment = ConstraintAttachment {
            constraint_id: constraint_id.to_string(),
            formation_template_id: template_id.to_string(),
        };
        self.store.put_attachment(&attachment)?;
        info!(constraint = %constraint_id, template = %template_id, "constraint attached");
        Ok(attachment)
    }

    /// Detach a constraint from a formation template.
    pub fn detach(&self, constraint_id: &str, template_id: &str) -> ConstraintResult<()> {
        if !self.store.delete_attachment(template_id, constraint_id)? {
            return Err(ConstraintError::NotFound(format!(
                "attachment of constraint {constraint_id} to formation template {template_id}"
            )));
        }
        info!(constraint = %constraint_id, template = %template_id, "constraint detached");
        Ok(())
    }

    /// Constraints visible on a template: its attachments plus all global ones.
    pub fn list_for_template(&self, template_id: &str) -> ConstraintResult<Vec<FormationConstraint>> {
        let attached: Vec<String> = self
            .store
            .list_attachments_for_template(template_id)?
            .into_iter()
            .map(|a| a.constraint_id)
            .collect();
        let mut constraints: Vec<FormationConstraint> = self
            .store
            .list_constraints()?
            .into_iter()
            .filter(|c| c.constraint_scope == ConstraintScope::Global || attached.contains(&c.id))
            .collect();
        constraints.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        Ok(constraints)
    }
}

fn validate(constraint: &FormationConstraint) -> ConstraintResult<()> {
    if constraint.name.trim().is_empty() {
        return Err(ConstraintError::Validation("name=cannot be blank".into()));
    }
    if constraint.resource_subtype.trim().is_empty() {
        return Err(ConstraintError::Validation(
            "resource_subtype=cannot be blank".into(),
        ));
    }
    if constraint.operator.parse::<OperatorKind>().is_err() {
        return Err(ConstraintError::Validation(format!(
            "operator=unknown operator {}",
            constraint.operator
        )));
    }
    if !constraint.input_template.trim().is_empty() {
        Template::parse(&constraint.input_template)
            .map_err(|e| ConstraintError::Validation(format!("input_template={e}")))?;
    }
    Ok(())
}

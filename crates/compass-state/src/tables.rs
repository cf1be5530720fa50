//! redb table definitions for the Compass state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{parent_id}/{child_id}`.

use redb::TableDefinition;

/// Formations keyed by `{formation_id}`.
pub const FORMATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("formations");

/// Formation templates keyed by `{template_id}`.
pub const FORMATION_TEMPLATES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("formation_templates");

/// Registered participants keyed by `{object_type}/{object_id}`.
pub const PARTICIPANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("participants");

/// Application templates keyed by `{template_id}`.
pub const APPLICATION_TEMPLATES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("application_templates");

/// Formation memberships keyed by `{formation_id}/{object_id}`.
pub const MEMBERSHIPS: TableDefinition<&str, &[u8]> = TableDefinition::new("memberships");

/// Formation assignments keyed by `{formation_id}/{source_id}/{target_id}`.
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");

/// Webhooks keyed by `{owner_id}/{webhook_id}`.
pub const WEBHOOKS: TableDefinition<&str, &[u8]> = TableDefinition::new("webhooks");

/// Formation constraints keyed by `{constraint_id}`.
pub const CONSTRAINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("constraints");

/// Constraint attachments keyed by `{template_id}/{constraint_id}`.
pub const CONSTRAINT_ATTACHMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("constraint_attachments");

/// Operations keyed by `{operation_id}`.
pub const OPERATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");

//! Registration of the records formations are built from: participants,
//! application templates, formation templates and webhooks.
//!
//! Deletions are refused while formations still reference the record.

use std::collections::BTreeSet;

use compass_state::*;
use tracing::info;

use crate::error::{FormationError, FormationResult};
use crate::orchestrator::{Orchestrator, kind_name, require};

impl Orchestrator {
    // ── Participants ───────────────────────────────────────────────

    pub fn register_participant(&self, participant: Participant) -> FormationResult<Participant> {
        require("id", &participant.id)?;
        require("name", &participant.name)?;
        if participant.object_type == ObjectType::RuntimeContext && participant.parent_id.is_none() {
            return Err(FormationError::Validation(
                "parentID=runtime contexts require a parent runtime".to_string(),
            ));
        }
        if let Some(template_id) = participant.application_template_id.as_deref() {
            if self.inner.store.get_application_template(template_id)?.is_none() {
                return Err(FormationError::not_found("application template", template_id));
            }
        }
        self.inner.store.put_participant(&participant)?;
        info!(id = %participant.id, object_type = %participant.object_type, "participant registered");
        Ok(participant)
    }

    pub fn get_participant(&self, object_type: ObjectType, id: &str) -> FormationResult<Participant> {
        self.inner
            .store
            .get_participant(object_type, id)?
            .ok_or_else(|| FormationError::not_found(kind_name(object_type), id))
    }

    pub fn list_participants(&self, object_type: ObjectType) -> FormationResult<Vec<Participant>> {
        Ok(self.inner.store.list_participants(object_type)?)
    }

    /// Delete a participant and its webhooks. Refused while it is a member
    /// of any formation.
    pub fn delete_participant(&self, object_type: ObjectType, id: &str) -> FormationResult<()> {
        let store = &self.inner.store;
        let participant = self.get_participant(object_type, id)?;
        let memberships = store.list_memberships_for_object(id)?;
        if !memberships.is_empty() {
            let mut formations = Vec::new();
            let mut runtimes = BTreeSet::new();
            for membership in &memberships {
                let Some(formation) = store.get_formation(&membership.formation_id)? else {
                    continue;
                };
                for other in store.list_memberships(&formation.id)? {
                    if other.object_id == id
                        || !matches!(other.object_type, ObjectType::Runtime | ObjectType::RuntimeContext)
                    {
                        continue;
                    }
                    let name = store
                        .get_participant(other.object_type, &other.object_id)?
                        .map(|p| p.name)
                        .unwrap_or(other.object_id);
                    runtimes.insert(name);
                }
                formations.push(formation.name);
            }
            let runtimes: Vec<String> = runtimes.into_iter().collect();
            let message = match object_type {
                ObjectType::Application => format!(
                    "System {} is still used and cannot be deleted. Unassign the system from the following formations first: {}. Then, unassign the system from the following runtimes, too: {}",
                    participant.name,
                    formations.join(", "),
                    runtimes.join(", ")
                ),
                _ => format!(
                    "{} {} is still used and cannot be deleted. Unassign it from the following formations first: {}",
                    kind_name(object_type),
                    participant.name,
                    formations.join(", ")
                ),
            };
            return Err(FormationError::Conflict(message));
        }

        for webhook in store.list_webhooks_for_owner(id)? {
            store.delete_webhook(id, &webhook.id)?;
        }
        store.delete_participant(object_type, id)?;
        info!(%id, %object_type, "participant deleted");
        Ok(())
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn register_application_template(&self, template: ApplicationTemplate) -> FormationResult<ApplicationTemplate> {
        require("id", &template.id)?;
        require("name", &template.name)?;
        self.inner.store.put_application_template(&template)?;
        info!(id = %template.id, name = %template.name, "application template registered");
        Ok(template)
    }

    /// Create or update a formation template. Names are unique.
    pub fn register_formation_template(&self, template: FormationTemplate) -> FormationResult<FormationTemplate> {
        require("id", &template.id)?;
        require("name", &template.name)?;
        if template.scope == TemplateScope::Tenant && template.tenant_id.is_none() {
            return Err(FormationError::Validation(
                "tenantID=tenant-scoped formation templates require a tenant".to_string(),
            ));
        }
        if template.runtime_artifact_kind.is_some() && template.runtime_types.is_empty() {
            return Err(FormationError::Validation(
                "runtimeTypes=a runtime artifact kind requires at least one runtime type".to_string(),
            ));
        }
        if let Some(existing) = self.inner.store.find_formation_template_by_name(&template.name)? {
            if existing.id != template.id {
                return Err(FormationError::AlreadyExists(format!("formation template {}", template.name)));
            }
        }
        self.inner.store.put_formation_template(&template)?;
        info!(id = %template.id, name = %template.name, "formation template registered");
        Ok(template)
    }

    pub fn get_formation_template(&self, id: &str) -> FormationResult<FormationTemplate> {
        self.inner
            .store
            .get_formation_template(id)?
            .ok_or_else(|| FormationError::not_found("formation template", id))
    }

    pub fn list_formation_templates(&self) -> FormationResult<Vec<FormationTemplate>> {
        Ok(self.inner.store.list_formation_templates()?)
    }

    /// Delete a formation template with its webhooks and constraint
    /// attachments. Refused while formations of this type exist.
    pub fn delete_formation_template(&self, id: &str) -> FormationResult<()> {
        let store = &self.inner.store;
        let template = self.get_formation_template(id)?;
        let formations = store.list_formations_for_template(id)?;
        if !formations.is_empty() {
            let names: Vec<String> = formations.into_iter().map(|f| f.name).collect();
            return Err(FormationError::Conflict(format!(
                "Formation template {} is still used by formations: {}",
                template.name,
                names.join(", ")
            )));
        }
        for webhook in store.list_webhooks_for_owner(id)? {
            store.delete_webhook(id, &webhook.id)?;
        }
        for attachment in store.list_attachments_for_template(id)? {
            store.delete_attachment(id, &attachment.constraint_id)?;
        }
        store.delete_formation_template(id)?;
        info!(%id, name = %template.name, "formation template deleted");
        Ok(())
    }

    // ── Webhooks ───────────────────────────────────────────────────

    /// Register a webhook after checking that its owner exists and its
    /// templates parse.
    pub fn register_webhook(&self, webhook: Webhook) -> FormationResult<Webhook> {
        require("id", &webhook.id)?;
        require("urlTemplate", &webhook.url_template)?;
        require("outputTemplate", &webhook.output_template)?;
        let store = &self.inner.store;
        let owner_exists = match webhook.owner_type {
            WebhookOwner::Application => store.get_participant(ObjectType::Application, &webhook.owner_id)?.is_some(),
            WebhookOwner::Runtime => store.get_participant(ObjectType::Runtime, &webhook.owner_id)?.is_some(),
            WebhookOwner::ApplicationTemplate => store.get_application_template(&webhook.owner_id)?.is_some(),
            WebhookOwner::FormationTemplate => store.get_formation_template(&webhook.owner_id)?.is_some(),
        };
        if !owner_exists {
            return Err(FormationError::not_found("webhook owner", &webhook.owner_id));
        }
        if (webhook.webhook_type == WebhookType::FormationLifecycle)
            != (webhook.owner_type == WebhookOwner::FormationTemplate)
        {
            return Err(FormationError::Validation(
                "type=FORMATION_LIFECYCLE webhooks belong to formation templates only".to_string(),
            ));
        }

        let templates = self.inner.dispatcher.templates();
        let sources = [
            Some(webhook.url_template.as_str()),
            Some(webhook.input_template.as_str()).filter(|t| !t.trim().is_empty()),
            Some(webhook.output_template.as_str()),
            webhook.header_template.as_deref().filter(|t| !t.trim().is_empty()),
        ];
        for source in sources.into_iter().flatten() {
            templates.get_or_parse(source)?;
        }

        store.put_webhook(&webhook)?;
        info!(
            id = %webhook.id,
            owner = %webhook.owner_id,
            webhook_type = ?webhook.webhook_type,
            mode = ?webhook.mode,
            "webhook registered"
        );
        Ok(webhook)
    }

    pub fn list_webhooks(&self, owner_id: &str) -> FormationResult<Vec<Webhook>> {
        Ok(self.inner.store.list_webhooks_for_owner(owner_id)?)
    }

    pub fn delete_webhook(&self, owner_id: &str, id: &str) -> FormationResult<()> {
        if !self.inner.store.delete_webhook(owner_id, id)? {
            return Err(FormationError::not_found("webhook", id));
        }
        info!(%owner_id, %id, "webhook deleted");
        Ok(())
    }
}

//! Participant lookups: template compatibility, notification endpoints and
//! webhook resolution.

use compass_notify::Endpoint;
use compass_state::{
    FormationTemplate, ObjectType, Participant, RuntimeArtifactKind, StateResult, StateStore,
    Webhook, WebhookType,
};

use crate::error::{FormationError, FormationResult};

/// Check that `participant` may join formations of `template`.
///
/// `parent` is the runtime of a runtime context.
pub fn check_compatible(
    template: &FormationTemplate,
    participant: &Participant,
    parent: Option<&Participant>,
) -> FormationResult<()> {
    let allowed = |types: &[String], subtype: &str| types.iter().any(|t| t == subtype);
    match participant.object_type {
        ObjectType::Application => {
            if !allowed(&template.application_types, participant.subtype()) {
                return Err(FormationError::Validation(format!(
                    "objectType=application type {:?} is not allowed by formation template {:?}; allowed: [{}]",
                    participant.subtype(),
                    template.name,
                    template.application_types.join(", ")
                )));
            }
        }
        ObjectType::Runtime => {
            if !allowed(&template.runtime_types, participant.subtype()) {
                return Err(FormationError::Validation(format!(
                    "objectType=runtime type {:?} is not allowed by formation template {:?}; allowed: [{}]",
                    participant.subtype(),
                    template.name,
                    template.runtime_types.join(", ")
                )));
            }
        }
        ObjectType::RuntimeContext => {
            if template.runtime_artifact_kind != Some(RuntimeArtifactKind::Subscription) {
                return Err(FormationError::Validation(format!(
                    "objectType=formation template {:?} does not accept runtime contexts",
                    template.name
                )));
            }
            let parent = parent.ok_or_else(|| {
                FormationError::Validation(format!(
                    "objectType=runtime context {} has no parent runtime",
                    participant.id
                ))
            })?;
            if !allowed(&template.runtime_types, parent.subtype()) {
                return Err(FormationError::Validation(format!(
                    "objectType=runtime type {:?} of the parent runtime is not allowed by formation template {:?}",
                    parent.subtype(),
                    template.name
                )));
            }
        }
        ObjectType::Tenant => {}
    }
    Ok(())
}

/// Load a participant with the records notification templates reach
/// through it.
pub fn load_endpoint(store: &StateStore, object_type: ObjectType, id: &str) -> StateResult<Option<Endpoint>> {
    let Some(participant) = store.get_participant(object_type, id)? else {
        return Ok(None);
    };
    let mut endpoint = Endpoint::new(participant);
    if let Some(template_id) = endpoint.participant.template_id() {
        endpoint.application_template = store.get_application_template(template_id)?;
    }
    if object_type == ObjectType::RuntimeContext {
        if let Some(parent_id) = endpoint.participant.parent_id.as_deref() {
            endpoint.parent = store.get_participant(ObjectType::Runtime, parent_id)?;
        }
    }
    Ok(Some(endpoint))
}

/// The webhook to call for a notification from `source` to `target`.
///
/// Application-to-application notifications use the target's tenant-mapping
/// webhook; everything else its configuration-changed webhook. Applications
/// inherit webhooks from their application template; runtime contexts use
/// the webhooks of their runtime.
pub fn resolve_webhook(store: &StateStore, source: &Participant, target: &Endpoint) -> StateResult<Option<Webhook>> {
    let target_participant = &target.participant;
    let wanted = if source.object_type == ObjectType::Application
        && target_participant.object_type == ObjectType::Application
    {
        WebhookType::ApplicationTenantMapping
    } else {
        WebhookType::ConfigurationChanged
    };

    let owner = match target_participant.object_type {
        ObjectType::RuntimeContext => match &target.parent {
            Some(parent) => parent.id.as_str(),
            None => return Ok(None),
        },
        ObjectType::Tenant => return Ok(None),
        _ => target_participant.id.as_str(),
    };

    if let Some(webhook) = find_webhook(store, owner, wanted)? {
        return Ok(Some(webhook));
    }
    if target_participant.object_type == ObjectType::Application {
        if let Some(template_id) = target_participant.template_id() {
            return find_webhook(store, template_id, wanted);
        }
    }
    Ok(None)
}

/// The FORMATION_LIFECYCLE webhook of a formation template, if any.
pub fn lifecycle_webhook(store: &StateStore, template_id: &str) -> StateResult<Option<Webhook>> {
    find_webhook(store, template_id, WebhookType::FormationLifecycle)
}

fn find_webhook(store: &StateStore, owner_id: &str, webhook_type: WebhookType) -> StateResult<Option<Webhook>> {
    Ok(store
        .list_webhooks_for_owner(owner_id)?
        .into_iter()
        .find(|w| w.webhook_type == webhook_type))
}

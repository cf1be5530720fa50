//! Caller authorization: consumer-subject mapping for status callbacks and
//! leading-product checks for formation lifecycle calls.

use std::collections::HashMap;

use compass_core::ConsumerConfig;
use compass_state::{FormationTemplate, Participant};
use tracing::debug;

/// Who is calling. The tenant scopes formation lookups; the consumer ID is
/// the certificate subject forwarded by the TLS-terminating proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: String,
    pub consumer_id: Option<String>,
}

impl Caller {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            consumer_id: None,
        }
    }

    pub fn with_consumer(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }
}

/// Maps consumer IDs to the targets they may report status for.
#[derive(Debug, Clone, Default)]
pub struct ConsumerDirectory {
    consumers: HashMap<String, ConsumerConfig>,
}

impl ConsumerDirectory {
    pub fn new(consumers: Vec<ConsumerConfig>) -> Self {
        Self {
            consumers: consumers.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// Whether `consumer_id` may report status for assignments targeting
    /// `target`: the target itself, its parent runtime, its application
    /// template, or its owning tenant must be granted to the consumer.
    pub fn may_report_for(&self, consumer_id: &str, target: &Participant) -> bool {
        let Some(consumer) = self.consumers.get(consumer_id) else {
            debug!(consumer = %consumer_id, "unknown consumer");
            return false;
        };
        let ids = [
            Some(target.id.as_str()),
            target.parent_id.as_deref(),
            target.template_id(),
        ];
        if ids
            .into_iter()
            .flatten()
            .any(|id| consumer.object_ids.iter().any(|granted| granted == id))
        {
            return true;
        }
        target
            .owner_tenant_id
            .as_deref()
            .is_some_and(|tenant| consumer.tenant_ids.iter().any(|granted| granted == tenant))
    }

    pub fn knows(&self, consumer_id: &str) -> bool {
        self.consumers.contains_key(consumer_id)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

/// Whether `caller` may create or delete formations of `template`.
///
/// Templates without leading products, and callers without a known
/// consumer ID, are unrestricted.
pub fn is_leading_product(template: &FormationTemplate, caller: &Caller) -> bool {
    match caller.consumer_id.as_deref() {
        Some(consumer) if !template.leading_product_ids.is_empty() => {
            template.leading_product_ids.iter().any(|p| p == consumer)
        }
        _ => true,
    }
}

//! Parsed-template cache keyed by source text.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::Template;
use crate::error::TemplateResult;

/// Shares parsed templates across renders.
///
/// Webhook templates are stored as source strings; each distinct source is
/// parsed at most once (modulo a benign race on first use).
#[derive(Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the parsed template for `source`, parsing and caching it on miss.
    pub fn get_or_parse(&self, source: &str) -> TemplateResult<Arc<Template>> {
        if let Some(template) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
        {
            return Ok(Arc::clone(template));
        }

        let template = Arc::new(Template::parse(source)?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(source.to_string())
            .or_insert_with(|| Arc::clone(&template));
        debug!(source_len = source.len(), "template parsed");
        Ok(Arc::clone(entry))
    }

    /// Number of cached templates.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

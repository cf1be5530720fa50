//! compass-template — the webhook template language.
//!
//! Webhook URL, body, header and output-parsing templates are written in a
//! small expression language over a JSON context:
//!
//! ```text
//! {"method": "{{if eq .Operation "assign"}}PATCH{{else}}DELETE{{end}}",
//!  "path": "https://{{ .Application.Labels.region }}.example.com/{{ .FormationID }}"}
//! ```
//!
//! Supported: field paths, string/number/bool/null literals, `{{if}}` /
//! `{{else if}}` / `{{else}}` / `{{end}}`, `{{-` and `-}}` trim markers,
//! comments, pipes, and the functions `eq ne not and or default json len`.
//!
//! Templates are parsed once into an AST ([`Template`]) and may be shared
//! through a [`TemplateCache`].

pub mod cache;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use cache::TemplateCache;
pub use error::{TemplateError, TemplateResult};
pub use parser::{Expr, Func, Node};

/// A parsed template, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source.
    pub fn parse(source: &str) -> TemplateResult<Self> {
        let nodes = parser::Parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a JSON context.
    pub fn render(&self, ctx: &Value) -> TemplateResult<String> {
        let mut out = String::with_capacity(self.source.len());
        eval::render_nodes(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }

    /// Render against any serializable context.
    pub fn render_with<C: Serialize>(&self, ctx: &C) -> TemplateResult<String> {
        let value = serde_json::to_value(ctx).map_err(|e| TemplateError::Context(e.to_string()))?;
        self.render(&value)
    }

    /// Render and parse the output as JSON.
    pub fn render_json<T: DeserializeOwned>(&self, ctx: &Value) -> TemplateResult<T> {
        let rendered = self.render(ctx)?;
        serde_json::from_str(&rendered).map_err(|e| TemplateError::InvalidOutput(e.to_string()))
    }
}

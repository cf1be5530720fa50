//! Building webhook requests and interpreting webhook responses.

use std::collections::BTreeMap;

use base64::Engine as _;
use compass_state::{AssignmentState, Webhook, WebhookAuth};
use compass_template::{TemplateCache, TemplateError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{NotifyError, NotifyResult};

/// Header carrying the delivery's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const USER_AGENT: &str = "compass-notify/0.1";

/// Stable key for a notification: identical for the original dispatch and
/// every re-delivery of the same (formation, source, target, operation).
pub fn idempotency_key(formation_id: &str, source: &str, target: &str, operation: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [formation_id, source, target, operation] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// A fully rendered outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WebhookRequest {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The delivered body as JSON, or as a JSON string when it is not JSON.
    pub fn payload(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        Some(serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone())))
    }
}

/// What came back from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    /// Lowercase header names; repeated headers joined with ", ".
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// The JSON object an output template renders.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResponseObject {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default = "default_success_status_code")]
    pub success_status_code: u16,
    #[serde(default)]
    pub incomplete_status_code: Option<u16>,
}

fn default_success_status_code() -> u16 {
    200
}

impl ResponseObject {
    /// The error message, ignoring empty strings.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// The reported assignment state, if present and valid.
    pub fn reported_state(&self) -> Option<AssignmentState> {
        self.state.as_deref().and_then(|s| s.parse().ok())
    }

    /// The reported configuration, treating `null` and `""` as absent.
    pub fn reported_config(&self) -> Option<Value> {
        match &self.config {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))),
            Some(v) => Some(v.clone()),
        }
    }
}

#[derive(Deserialize)]
struct RequestLine {
    method: String,
    path: String,
}

/// Render a webhook's URL, body and header templates against `ctx`.
pub fn render_request<C: Serialize>(
    webhook: &Webhook,
    ctx: &C,
    key: &str,
    templates: &TemplateCache,
) -> NotifyResult<WebhookRequest> {
    let ctx = serde_json::to_value(ctx).map_err(|e| TemplateError::Context(e.to_string()))?;

    let rendered_url = templates.get_or_parse(&webhook.url_template)?.render(&ctx)?;
    let (method, url) = parse_request_line(rendered_url.trim())?;

    let body = if webhook.input_template.trim().is_empty() {
        String::new()
    } else {
        templates.get_or_parse(&webhook.input_template)?.render(&ctx)?
    };

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
    ];
    if let Some(header_template) = webhook.header_template.as_deref().filter(|t| !t.trim().is_empty()) {
        let rendered: BTreeMap<String, Value> = templates
            .get_or_parse(header_template)?
            .render_json(&ctx)
            .map_err(|e| NotifyError::InvalidRequest(format!("headers: {e}")))?;
        for (name, value) in rendered {
            match value {
                Value::String(v) => headers.push((name, v)),
                Value::Array(items) => {
                    for item in items {
                        let Value::String(v) = item else {
                            return Err(NotifyError::InvalidRequest(format!(
                                "header {name} must be a string or list of strings"
                            )));
                        };
                        headers.push((name.clone(), v));
                    }
                }
                _ => {
                    return Err(NotifyError::InvalidRequest(format!(
                        "header {name} must be a string or list of strings"
                    )));
                }
            }
        }
    }
    if let Some(auth) = &webhook.auth {
        headers.push(("Authorization".to_string(), authorization(auth)));
    }
    headers.push((IDEMPOTENCY_KEY_HEADER.to_string(), key.to_string()));

    Ok(WebhookRequest {
        method,
        url,
        headers,
        body,
    })
}

/// Interpret a response through the webhook's output template.
pub fn parse_response(
    webhook: &Webhook,
    response: &WebhookResponse,
    templates: &TemplateCache,
) -> NotifyResult<ResponseObject> {
    let body = if response.body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&response.body).unwrap_or_else(|_| Value::String(response.body.clone()))
    };
    let ctx = json!({
        "Body": body,
        "Headers": response.headers,
        "StatusCode": response.status,
    });
    templates
        .get_or_parse(&webhook.output_template)?
        .render_json(&ctx)
        .map_err(|e| match e {
            TemplateError::InvalidOutput(message) => NotifyError::InvalidResponse(message),
            other => NotifyError::Template(other),
        })
}

/// Accepts `{"method": "...", "path": "..."}` or a bare URL (POST).
fn parse_request_line(rendered: &str) -> NotifyResult<(http::Method, String)> {
    let (method, url) = if rendered.starts_with('{') {
        let line: RequestLine = serde_json::from_str(rendered)
            .map_err(|e| NotifyError::InvalidRequest(format!("url template: {e}")))?;
        (line.method, line.path)
    } else {
        ("POST".to_string(), rendered.to_string())
    };
    if url.is_empty() {
        return Err(NotifyError::InvalidRequest("url is empty".into()));
    }
    let method = http::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| NotifyError::InvalidRequest(format!("invalid method: {method}")))?;
    Ok((method, url))
}

fn authorization(auth: &WebhookAuth) -> String {
    match auth {
        WebhookAuth::Basic { username, password } => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            format!("Basic {encoded}")
        }
        WebhookAuth::Bearer { token } => format!("Bearer {token}"),
    }
}

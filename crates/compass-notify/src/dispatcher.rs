//! Turns a webhook and a notification context into an assignment outcome.
//!
//! Sync webhooks report their result in the response: the success status
//! code maps to READY (or the state the body reports), the incomplete status
//! code to CONFIG_PENDING, anything else to the operation's error state.
//! Async webhooks only acknowledge the request; the assignment stays
//! CONFIG_PENDING until the target calls back.

use std::sync::Arc;

use compass_state::{AssignmentOperation, AssignmentState, Webhook, WebhookMode};
use compass_template::TemplateCache;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::{LifecycleContext, NotificationContext};
use crate::error::NotifyResult;
use crate::request::{
    ResponseObject, WebhookRequest, WebhookResponse, idempotency_key, parse_response,
    render_request,
};
use crate::transport::{RetryPolicy, WebhookTransport, deliver};

/// Outcome of one assignment notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub state: AssignmentState,
    /// Configuration reported by the target.
    pub config: Option<Value>,
    pub error: Option<String>,
    /// Request body as delivered.
    pub payload: Option<Value>,
    /// True when the outcome arrives later through the status callback.
    pub scheduled: bool,
    /// Operation location reported by an async target.
    pub location: Option<String>,
}

impl DispatchResult {
    /// Outcome for an assignment that needs no webhook call.
    pub fn ready() -> Self {
        Self {
            state: AssignmentState::Ready,
            config: None,
            error: None,
            payload: None,
            scheduled: false,
            location: None,
        }
    }

    /// Outcome for a notification that could not be delivered.
    pub fn failed(operation: AssignmentOperation, payload: Option<Value>, error: String) -> Self {
        Self {
            state: operation.error_state(),
            config: None,
            error: Some(error),
            payload,
            scheduled: false,
            location: None,
        }
    }
}

/// Outcome of a formation lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOutcome {
    pub succeeded: bool,
    pub error: Option<String>,
}

/// How a response classifies against the webhook's status codes.
enum Classified {
    Success(ResponseObject),
    Incomplete(ResponseObject),
    Failed(String),
}

/// Renders, delivers and interprets webhook notifications.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    templates: Arc<TemplateCache>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn WebhookTransport>, templates: Arc<TemplateCache>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            templates,
            retry,
        }
    }

    pub fn templates(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    /// Notify the target of `ctx.assignment` through `webhook`.
    ///
    /// Never fails: every error is folded into the returned state so it can
    /// be recorded on the assignment.
    pub async fn notify(
        &self,
        webhook: &Webhook,
        ctx: &NotificationContext,
        operation: AssignmentOperation,
    ) -> DispatchResult {
        let key = idempotency_key(
            &ctx.formation_id,
            &ctx.assignment.source,
            &ctx.assignment.target,
            operation.as_str(),
        );

        let request = match render_request(webhook, ctx, &key, &self.templates) {
            Ok(request) => request,
            Err(e) => {
                warn!(assignment = %ctx.assignment.id, webhook = %webhook.id, error = %e, "failed to render webhook request");
                return DispatchResult::failed(operation, None, e.to_string());
            }
        };
        let payload = request.payload();

        let response = match self.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(assignment = %ctx.assignment.id, url = %request.url, error = %e, "webhook delivery failed");
                return DispatchResult::failed(operation, payload, e.to_string());
            }
        };

        let result = match webhook.mode {
            WebhookMode::Sync => self.interpret_sync(webhook, &response, operation, payload),
            WebhookMode::Async => self.interpret_async(webhook, &response, operation, payload),
        };
        info!(
            assignment = %ctx.assignment.id,
            source = %ctx.assignment.source,
            target = %ctx.assignment.target,
            operation = operation.as_str(),
            status = response.status,
            state = %result.state,
            "assignment notification delivered"
        );
        result
    }

    /// Notify a formation template's lifecycle webhook.
    pub async fn notify_lifecycle(&self, webhook: &Webhook, ctx: &LifecycleContext) -> LifecycleOutcome {
        let key = idempotency_key(&ctx.formation_id, "", "", &ctx.operation);
        let outcome = match render_request(webhook, ctx, &key, &self.templates) {
            Ok(request) => match self.send(&request).await {
                Ok(response) => match self.classify(webhook, &response) {
                    Classified::Success(_) | Classified::Incomplete(_) => LifecycleOutcome {
                        succeeded: true,
                        error: None,
                    },
                    Classified::Failed(error) => LifecycleOutcome {
                        succeeded: false,
                        error: Some(error),
                    },
                },
                Err(e) => LifecycleOutcome {
                    succeeded: false,
                    error: Some(e.to_string()),
                },
            },
            Err(e) => LifecycleOutcome {
                succeeded: false,
                error: Some(e.to_string()),
            },
        };
        info!(
            formation = %ctx.formation_id,
            operation = %ctx.operation,
            succeeded = outcome.succeeded,
            "formation lifecycle notification delivered"
        );
        outcome
    }

    async fn send(&self, request: &WebhookRequest) -> NotifyResult<WebhookResponse> {
        debug!(method = %request.method, url = %request.url, "sending webhook");
        deliver(self.transport.as_ref(), request, &self.retry).await
    }

    fn classify(&self, webhook: &Webhook, response: &WebhookResponse) -> Classified {
        let parsed = match parse_response(webhook, response, &self.templates) {
            Ok(parsed) => parsed,
            Err(e) => return Classified::Failed(e.to_string()),
        };
        if let Some(error) = parsed.error_message() {
            return Classified::Failed(error.to_string());
        }
        if response.status == parsed.success_status_code {
            Classified::Success(parsed)
        } else if Some(response.status) == parsed.incomplete_status_code {
            Classified::Incomplete(parsed)
        } else {
            Classified::Failed(format!(
                "received unexpected status code {} from webhook",
                response.status
            ))
        }
    }

    fn interpret_sync(
        &self,
        webhook: &Webhook,
        response: &WebhookResponse,
        operation: AssignmentOperation,
        payload: Option<Value>,
    ) -> DispatchResult {
        match self.classify(webhook, response) {
            Classified::Success(parsed) => {
                let (state, error) = match parsed.reported_state() {
                    Some(state) if state.is_error() => (
                        operation.error_state(),
                        Some(format!("target reported state {state}")),
                    ),
                    Some(AssignmentState::ConfigPending) => (AssignmentState::ConfigPending, None),
                    _ => (AssignmentState::Ready, None),
                };
                DispatchResult {
                    state,
                    config: parsed.reported_config(),
                    error,
                    payload,
                    scheduled: false,
                    location: parsed.location.filter(|l| !l.is_empty()),
                }
            }
            Classified::Incomplete(parsed) => DispatchResult {
                state: AssignmentState::ConfigPending,
                config: parsed.reported_config(),
                error: None,
                payload,
                scheduled: false,
                location: parsed.location.filter(|l| !l.is_empty()),
            },
            Classified::Failed(error) => DispatchResult::failed(operation, payload, error),
        }
    }

    fn interpret_async(
        &self,
        webhook: &Webhook,
        response: &WebhookResponse,
        operation: AssignmentOperation,
        payload: Option<Value>,
    ) -> DispatchResult {
        match self.classify(webhook, response) {
            Classified::Success(parsed) | Classified::Incomplete(parsed) => DispatchResult {
                state: AssignmentState::ConfigPending,
                config: None,
                error: None,
                payload,
                scheduled: true,
                location: parsed.location.filter(|l| !l.is_empty()),
            },
            Classified::Failed(error) => DispatchResult::failed(operation, payload, error),
        }
    }
}

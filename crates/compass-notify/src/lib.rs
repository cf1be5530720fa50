//! compass-notify — webhook notifications for formation changes.
//!
//! Renders a participant's webhook templates against a notification
//! context, delivers the request over HTTP with exponential backoff and
//! maps the response onto an assignment state.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── render_request()  url / input / header templates → WebhookRequest
//!   ├── deliver()         WebhookTransport + RetryPolicy (5xx, transport errors)
//!   │   └── HttpTransport (hyper http1 over TcpStream or rustls)
//!   └── parse_response()  output template → ResponseObject → DispatchResult
//! ```
//!
//! # Idempotency
//!
//! Every request carries an `Idempotency-Key` header derived from
//! (formation, source, target, operation). Re-deliveries of the same
//! notification reuse the key so targets can drop duplicates.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod request;
pub mod transport;

pub use context::{
    CustomerTenantContext, Endpoint, LifecycleContext, LifecycleOperation, NotificationContext,
    ParticipantView,
};
pub use dispatcher::{DispatchResult, Dispatcher, LifecycleOutcome};
pub use error::{NotifyError, NotifyResult};
pub use request::{
    IDEMPOTENCY_KEY_HEADER, ResponseObject, WebhookRequest, WebhookResponse, idempotency_key,
    parse_response, render_request,
};
pub use transport::{Backoff, BoxFuture, HttpTransport, RetryPolicy, WebhookTransport, deliver};

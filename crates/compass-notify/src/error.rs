//! Notification error types.

use std::time::Duration;

use compass_template::TemplateError;

/// Errors raised while building, delivering or interpreting a webhook call.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// The rendered URL, method or headers are unusable.
    #[error("invalid webhook request: {0}")]
    InvalidRequest(String),

    /// Connection, handshake or I/O failure.
    #[error("webhook transport error: {0}")]
    Transport(String),

    #[error("tls configuration error: {0}")]
    TlsConfig(String),

    #[error("webhook request timed out after {0:?}")]
    Timeout(Duration),

    /// The output template did not yield a usable response object.
    #[error("invalid webhook response: {0}")]
    InvalidResponse(String),
}

impl NotifyError {
    /// Whether delivery may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

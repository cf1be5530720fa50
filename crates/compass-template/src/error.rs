//! Template error types

/// Errors that can occur while parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("parse error at line {line}, column {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("missing field: {path}")]
    MissingField { path: String },

    #[error("error calling {name}: {message}")]
    Function { name: String, message: String },

    #[error("invalid template context: {0}")]
    Context(String),

    #[error("rendered output is not valid: {0}")]
    InvalidOutput(String),
}

/// Result type alias for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

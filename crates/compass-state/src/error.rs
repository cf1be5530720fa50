//! Error types for the Compass state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Failures of the redb store and of the JSON records kept in it.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state store at {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: redb::DatabaseError,
    },

    #[error("state store transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("state store commit failed: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("state store table unavailable: {0}")]
    Table(#[from] redb::TableError),

    /// Read, write or iteration failure below a table.
    #[error("state store I/O failed: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored value is no longer readable as its record type.
    #[error("corrupt record {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

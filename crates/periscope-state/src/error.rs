//! Error types for the Periscope state store.

use thiserror::Error;

/// Result type alias for state store and collaborator operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the state store and the collaborators built on it.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// A stored key could not be decoded back into an identifier.
    #[error("corrupt key {key:?} in table {table}")]
    CorruptKey { table: &'static str, key: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
}

impl StateError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// True if this error reports a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

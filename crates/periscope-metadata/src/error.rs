//! Error types for the metadata control plane.

use periscope_state::StateError;
use tonic::{Code, Status};

/// Errors returned by metadata control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    Unimplemented(String),

    #[error("missing agent mapping for table '{table}'")]
    MissingAgentMapping { table: String },

    #[error(transparent)]
    State(#[from] StateError),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

impl MetadataError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The RPC status code this error surfaces as.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Internal(_) | Self::MissingAgentMapping { .. } => Code::Internal,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::State(e) if e.is_not_found() => Code::NotFound,
            Self::State(_) => Code::Internal,
        }
    }
}

impl From<MetadataError> for Status {
    fn from(err: MetadataError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}

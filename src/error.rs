use thiserror::Error;

use crate::resource::ResourceId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("another transaction is already active in this context")]
    AnotherTransactionActive,

    #[error("no active transaction in this context")]
    NoActiveTransaction,

    #[error("active transaction was aborted")]
    ActiveTransactionAborted,

    #[error("unknown resource id: {0}")]
    UnknownResourceId(ResourceId),

    #[error("duplicate resource id: {0}")]
    DuplicateResourceId(ResourceId),

    #[error(transparent)]
    ResourceOperation(#[from] ResourceOperationError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`ResourceOperation`](crate::ResourceOperation).
///
/// Surfaced to the caller unchanged as [`Error::ResourceOperation`].
#[derive(Error, Debug)]
#[error("resource operation failed: {message}")]
pub struct ResourceOperationError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ResourceOperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

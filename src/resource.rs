use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResourceOperationError;

/// Opaque, totally ordered identifier of a lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A unit of shared state managed by a [`TransactionManager`](crate::TransactionManager).
///
/// Resources are only ever mutated through a [`ResourceOperation`] applied by
/// the transaction that currently owns them.
pub trait Resource: Send + 'static {
    fn id(&self) -> ResourceId;
}

/// A reversible mutation of a resource.
pub trait ResourceOperation<R>: Send + Sync {
    /// Apply the operation. On error the resource must be left unchanged.
    fn execute(&self, resource: &mut R) -> Result<(), ResourceOperationError>;

    /// Reverse the most recent successful `execute` on `resource`.
    fn undo(&self, resource: &mut R);
}

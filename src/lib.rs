pub mod clock;
pub mod config;
pub mod context;
mod deadlock;
pub mod engine;
pub mod error;
mod lock_table;
pub mod resource;
pub mod stats;
mod sync;
pub mod transaction;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use config::ManagerConfig;
pub use context::{CancellationToken, ContextId, ExecutionContext};
pub use engine::TransactionManager;
pub use error::{Error, ResourceOperationError, Result};
pub use resource::{Resource, ResourceId, ResourceOperation};
pub use stats::ManagerStats;
pub use transaction::TransactionInfo;

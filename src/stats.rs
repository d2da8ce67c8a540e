use serde::Serialize;

/// Counters describing a [`TransactionManager`](crate::TransactionManager)'s
/// lifetime activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    /// Acquisitions that had to block at least once.
    pub lock_waits: u64,
    /// Cycles broken by aborting a victim.
    pub deadlocks_resolved: u64,
    pub active: usize,
}

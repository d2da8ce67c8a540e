//! Exclusive resource locks with blocking acquisition.
//!
//! All owner and wait-list state lives in one [`TableState`] behind a single
//! mutex. Blocked transactions park on the paired condvar, which is
//! broadcast whenever resources are released or a deadlock victim is chosen.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use tracing::{trace, warn};

use crate::context::{ContextId, Wake};
use crate::deadlock;
use crate::error::{Error, Result};
use crate::resource::ResourceId;
use crate::sync::{lock, wait};
use crate::transaction::Transaction;

pub(crate) struct LockRecord<R> {
    pub owner: Option<Arc<Transaction<R>>>,
    pub waiters: Vec<Arc<Transaction<R>>>,
}

impl<R> LockRecord<R> {
    fn new() -> Self {
        Self {
            owner: None,
            waiters: Vec::new(),
        }
    }

    fn is_owned_by(&self, tx: &Arc<Transaction<R>>) -> bool {
        self.owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, tx))
    }

    fn has_waiter(&self, tx: &Arc<Transaction<R>>) -> bool {
        self.waiters.iter().any(|w| Arc::ptr_eq(w, tx))
    }

    fn remove_waiter(&mut self, tx: &Arc<Transaction<R>>) {
        self.waiters.retain(|w| !Arc::ptr_eq(w, tx));
    }
}

/// Snapshot-consistent view of every lock record. Only ever accessed with the
/// table mutex held.
pub(crate) struct TableState<R> {
    pub records: BTreeMap<ResourceId, LockRecord<R>>,
}

impl<R> TableState<R> {
    pub fn new(ids: impl IntoIterator<Item = ResourceId>) -> Self {
        Self {
            records: ids.into_iter().map(|id| (id, LockRecord::new())).collect(),
        }
    }

    pub fn owner(&self, id: &ResourceId) -> Option<&Arc<Transaction<R>>> {
        self.records.get(id).and_then(|r| r.owner.as_ref())
    }

    pub fn is_waiting_for(&self, tx: &Arc<Transaction<R>>, id: &ResourceId) -> bool {
        self.records.get(id).is_some_and(|r| r.has_waiter(tx))
    }

    /// The resource `tx` is blocked on. A transaction waits on at most one.
    pub fn waiting_on(&self, tx: &Arc<Transaction<R>>) -> Option<&ResourceId> {
        self.records
            .iter()
            .find(|(_, r)| r.has_waiter(tx))
            .map(|(id, _)| id)
    }

    fn owned_by_other(&self, id: &ResourceId, tx: &Arc<Transaction<R>>) -> bool {
        self.owner(id).is_some_and(|o| !Arc::ptr_eq(o, tx))
    }
}

struct Shared<R> {
    state: Mutex<TableState<R>>,
    available: Condvar,
}

impl<R: Send + 'static> Wake for Shared<R> {
    fn wake_all(&self) {
        // Taking the mutex orders this broadcast after any waiter that has
        // checked its token but not yet parked.
        let _state = lock(&self.state);
        self.available.notify_all();
    }
}

pub(crate) struct LockTable<R> {
    shared: Arc<Shared<R>>,
    active: Arc<AtomicUsize>,
    deadlock_detection: bool,
    lock_waits: AtomicU64,
    deadlocks_resolved: AtomicU64,
}

impl<R: Send + 'static> LockTable<R> {
    pub fn new(
        ids: impl IntoIterator<Item = ResourceId>,
        active: Arc<AtomicUsize>,
        deadlock_detection: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TableState::new(ids)),
                available: Condvar::new(),
            }),
            active,
            deadlock_detection,
            lock_waits: AtomicU64::new(0),
            deadlocks_resolved: AtomicU64::new(0),
        }
    }

    /// Make `tx` the owner of `id`, blocking while another transaction holds it.
    ///
    /// Fails with [`Error::ActiveTransactionAborted`] if `tx` is chosen as a
    /// deadlock victim while blocked, or [`Error::Cancelled`] if its context
    /// is cancelled for any other reason.
    pub fn acquire(&self, tx: &Arc<Transaction<R>>, id: &ResourceId) -> Result<()> {
        let mut state = lock(&self.shared.state);
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| Error::UnknownResourceId(id.clone()))?;
        if record.is_owned_by(tx) {
            return Ok(());
        }
        record.waiters.push(Arc::clone(tx));

        let token = tx.context().token();
        let parked_on: Weak<dyn Wake> = Arc::downgrade(&self.shared) as Weak<dyn Wake>;
        token.park(parked_on);

        let mut blocked = false;
        while state.owned_by_other(id, tx) {
            if !blocked {
                blocked = true;
                self.lock_waits.fetch_add(1, Ordering::Relaxed);
                trace!(context = %tx.context_id(), resource = %id, "waiting for resource");
            }
            if self.deadlock_detection {
                self.resolve_deadlock(&state, tx, id);
            }
            if token.take() {
                if let Some(record) = state.records.get_mut(id) {
                    record.remove_waiter(tx);
                }
                token.unpark();
                return Err(if tx.is_aborted() {
                    Error::ActiveTransactionAborted
                } else {
                    Error::Cancelled
                });
            }
            state = wait(&self.shared.available, state);
        }

        if let Some(record) = state.records.get_mut(id) {
            record.owner = Some(Arc::clone(tx));
            record.remove_waiter(tx);
        }
        tx.add_owned(id.clone());
        token.unpark();
        self.shared.available.notify_one();
        Ok(())
    }

    fn resolve_deadlock(&self, state: &TableState<R>, tx: &Arc<Transaction<R>>, id: &ResourceId) {
        let active = self.active.load(Ordering::SeqCst);
        let cycle = deadlock::find_cycle(state, id, tx, active);
        let Some(victim) = deadlock::select_victim(&cycle) else {
            return;
        };
        if !victim.mark_aborted() {
            // Already chosen on an earlier pass; it has not unwound yet.
            return;
        }
        self.deadlocks_resolved.fetch_add(1, Ordering::Relaxed);
        warn!(
            victim = %victim.context_id(),
            created_at = victim.created_at(),
            cycle_len = cycle.len(),
            "deadlock detected, aborting youngest transaction"
        );
        victim.context().token().signal();
        self.shared.available.notify_all();
    }

    /// Drop every lock `tx` holds and wake all blocked transactions.
    ///
    /// If `tx` was aborted as a deadlock victim its context's token is reset,
    /// which also discards any external cancellation still pending on it. The
    /// context's next transaction starts with a clear token.
    pub fn release_all(&self, tx: &Arc<Transaction<R>>) {
        let mut state = lock(&self.shared.state);
        for id in tx.take_owned() {
            if let Some(record) = state.records.get_mut(&id) {
                if record.is_owned_by(tx) {
                    record.owner = None;
                }
            }
        }
        // The abort signal belongs to this transaction; once it holds nothing
        // it can no longer be picked again, so the next one starts clean.
        if tx.is_aborted() {
            tx.context().token().reset();
        }
        drop(state);
        self.shared.available.notify_all();
    }

    pub fn owner_of(&self, id: &ResourceId) -> Result<Option<ContextId>> {
        let state = lock(&self.shared.state);
        let record = state
            .records
            .get(id)
            .ok_or_else(|| Error::UnknownResourceId(id.clone()))?;
        Ok(record.owner.as_ref().map(|o| o.context_id()))
    }

    pub fn waiters_of(&self, id: &ResourceId) -> Result<Vec<ContextId>> {
        let state = lock(&self.shared.state);
        let record = state
            .records
            .get(id)
            .ok_or_else(|| Error::UnknownResourceId(id.clone()))?;
        Ok(record.waiters.iter().map(|w| w.context_id()).collect())
    }

    pub fn lock_waits(&self) -> u64 {
        self.lock_waits.load(Ordering::Relaxed)
    }

    pub fn deadlocks_resolved(&self) -> u64 {
        self.deadlocks_resolved.load(Ordering::Relaxed)
    }
}

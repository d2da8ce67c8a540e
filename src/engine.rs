use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::clock::TimeSource;
use crate::config::ManagerConfig;
use crate::context::{ContextId, ExecutionContext};
use crate::error::{Error, Result};
use crate::lock_table::LockTable;
use crate::resource::{Resource, ResourceId, ResourceOperation};
use crate::stats::ManagerStats;
use crate::sync::lock;
use crate::transaction::{ResourceSlot, Transaction, TransactionInfo};

/// Runs transactions over a fixed set of exclusively locked resources.
///
/// Thread-safe: share it behind an `Arc`. Each call names the calling
/// [`ExecutionContext`]; a context runs at most one transaction at a time.
///
/// Locking discipline:
/// - the lock table (owners and wait lists) sits behind one mutex, and
///   deadlock detection runs while holding it;
/// - the registry of active transactions has its own mutex, never held while
///   the lock table mutex is taken;
/// - each transaction guards its own owned set and undo log, and each
///   resource payload has its own mutex.
pub struct TransactionManager<R> {
    config: ManagerConfig,
    clock: Arc<dyn TimeSource>,
    resources: BTreeMap<ResourceId, ResourceSlot<R>>,
    locks: LockTable<R>,
    registry: Mutex<HashMap<ContextId, Arc<Transaction<R>>>>,
    active: Arc<AtomicUsize>,
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl<R: Resource> TransactionManager<R> {
    /// Create a manager over `resources` with the default configuration.
    pub fn new(
        resources: impl IntoIterator<Item = R>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        Self::with_config(resources, clock, ManagerConfig::default())
    }

    pub fn with_config(
        resources: impl IntoIterator<Item = R>,
        clock: Arc<dyn TimeSource>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let mut slots = BTreeMap::new();
        for resource in resources {
            let id = resource.id();
            if slots.contains_key(&id) {
                return Err(Error::DuplicateResourceId(id));
            }
            slots.insert(id, Arc::new(Mutex::new(resource)));
        }

        let active = Arc::new(AtomicUsize::new(0));
        let locks = LockTable::new(
            slots.keys().cloned(),
            Arc::clone(&active),
            config.deadlock_detection,
        );

        Ok(Self {
            config,
            clock,
            resources: slots,
            locks,
            registry: Mutex::new(HashMap::new()),
            active,
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        })
    }

    fn current(&self, ctx: &ExecutionContext) -> Option<Arc<Transaction<R>>> {
        lock(&self.registry).get(&ctx.id()).cloned()
    }

    fn deregister(&self, tx: &Arc<Transaction<R>>) {
        let mut registry = lock(&self.registry);
        registry.remove(&tx.context_id());
        self.active.store(registry.len(), Ordering::SeqCst);
    }

    /// Begin a transaction in `ctx`. The transaction keeps `ctx`'s token for
    /// deadlock and cancellation signals; see [`ExecutionContext::new`].
    pub fn start_transaction(&self, ctx: &ExecutionContext) -> Result<()> {
        let mut registry = lock(&self.registry);
        if registry.contains_key(&ctx.id()) {
            return Err(Error::AnotherTransactionActive);
        }
        let created_at = self.clock.now();
        registry.insert(
            ctx.id(),
            Arc::new(Transaction::new(ctx.clone(), created_at)),
        );
        self.active.store(registry.len(), Ordering::SeqCst);
        drop(registry);

        self.started.fetch_add(1, Ordering::Relaxed);
        debug!(context = %ctx.id(), created_at, "transaction started");
        Ok(())
    }

    /// Apply `operation` to resource `id` inside the context's transaction,
    /// first taking the resource's lock if the transaction does not hold it.
    ///
    /// Blocks while another transaction owns the resource. An operation that
    /// fails, or that completes while the context is being cancelled, leaves
    /// no trace in the transaction.
    pub fn operate_on_resource(
        &self,
        ctx: &ExecutionContext,
        id: &ResourceId,
        operation: Arc<dyn ResourceOperation<R>>,
    ) -> Result<()> {
        let tx = self.current(ctx).ok_or(Error::NoActiveTransaction)?;
        if tx.is_aborted() {
            return Err(Error::ActiveTransactionAborted);
        }
        let slot = self
            .resources
            .get(id)
            .ok_or_else(|| Error::UnknownResourceId(id.clone()))?;

        if !tx.owns(id) {
            self.locks.acquire(&tx, id)?;
        }

        {
            let mut resource = lock(slot);
            operation.execute(&mut resource)?;
            if tx.context().token().take() {
                operation.undo(&mut resource);
                return Err(Error::Cancelled);
            }
        }
        tx.push_undo(Arc::clone(slot), operation);
        Ok(())
    }

    /// Make the context's transaction permanent and release its resources.
    pub fn commit_transaction(&self, ctx: &ExecutionContext) -> Result<()> {
        let tx = self.current(ctx).ok_or(Error::NoActiveTransaction)?;
        if tx.is_aborted() {
            return Err(Error::ActiveTransactionAborted);
        }
        let held = tx.owned_ids().len();
        self.locks.release_all(&tx);
        self.deregister(&tx);

        self.committed.fetch_add(1, Ordering::Relaxed);
        debug!(context = %ctx.id(), released = held, "transaction committed");
        Ok(())
    }

    /// Undo everything the context's transaction applied, newest first, and
    /// release its resources. Does nothing when no transaction is active.
    pub fn rollback_transaction(&self, ctx: &ExecutionContext) {
        let Some(tx) = self.current(ctx) else {
            return;
        };
        let undone = tx.unwind();
        let aborted = tx.is_aborted();
        self.locks.release_all(&tx);
        self.deregister(&tx);

        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        debug!(context = %ctx.id(), undone, aborted, "transaction rolled back");
    }

    pub fn is_transaction_active(&self, ctx: &ExecutionContext) -> bool {
        lock(&self.registry).contains_key(&ctx.id())
    }

    /// `true` once the context's transaction has been picked as a deadlock
    /// victim; `false` when no transaction is active.
    pub fn is_transaction_aborted(&self, ctx: &ExecutionContext) -> bool {
        self.current(ctx).is_some_and(|tx| tx.is_aborted())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.keys().cloned().collect()
    }

    /// The context whose transaction currently holds `id`.
    pub fn owner_of(&self, id: &ResourceId) -> Result<Option<ContextId>> {
        self.locks.owner_of(id)
    }

    /// Contexts blocked waiting for `id`.
    pub fn waiters_of(&self, id: &ResourceId) -> Result<Vec<ContextId>> {
        self.locks.waiters_of(id)
    }

    pub fn transaction_info(&self, ctx: &ExecutionContext) -> Option<TransactionInfo> {
        self.current(ctx).map(|tx| tx.info())
    }

    /// Read a resource payload. Does not take the resource's transactional
    /// lock, so the value may include uncommitted changes.
    pub fn with_resource<T>(&self, id: &ResourceId, f: impl FnOnce(&R) -> T) -> Result<T> {
        let slot = self
            .resources
            .get(id)
            .ok_or_else(|| Error::UnknownResourceId(id.clone()))?;
        let resource = lock(slot);
        Ok(f(&resource))
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            lock_waits: self.locks.lock_waits(),
            deadlocks_resolved: self.locks.deadlocks_resolved(),
            active: self.active.load(Ordering::SeqCst),
        }
    }
}

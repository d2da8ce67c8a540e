use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::context::{ContextId, ExecutionContext};
use crate::resource::{ResourceId, ResourceOperation};
use crate::sync::lock;

/// A resource payload. Only the transaction owning the matching lock record
/// ever locks it, so the mutex is uncontended in practice.
pub(crate) type ResourceSlot<R> = Arc<Mutex<R>>;

/// An applied operation, kept so rollback can reverse it.
pub(crate) struct UndoEntry<R> {
    pub resource: ResourceSlot<R>,
    pub operation: Arc<dyn ResourceOperation<R>>,
}

/// Per-context transaction state.
pub(crate) struct Transaction<R> {
    context: ExecutionContext,
    created_at: i64,
    /// Set once by deadlock resolution, never cleared.
    aborted: AtomicBool,
    /// Written only under the lock table mutex. Read without it only by the
    /// owning context.
    owned: Mutex<BTreeSet<ResourceId>>,
    undo_log: Mutex<Vec<UndoEntry<R>>>,
}

impl<R> Transaction<R> {
    pub fn new(context: ExecutionContext, created_at: i64) -> Self {
        Self {
            context,
            created_at,
            aborted: AtomicBool::new(false),
            owned: Mutex::new(BTreeSet::new()),
            undo_log: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Returns `true` only for the call that flipped the flag.
    pub fn mark_aborted(&self) -> bool {
        !self.aborted.swap(true, Ordering::SeqCst)
    }

    pub fn owns(&self, id: &ResourceId) -> bool {
        lock(&self.owned).contains(id)
    }

    pub fn owned_ids(&self) -> Vec<ResourceId> {
        lock(&self.owned).iter().cloned().collect()
    }

    pub fn add_owned(&self, id: ResourceId) {
        lock(&self.owned).insert(id);
    }

    pub fn take_owned(&self) -> BTreeSet<ResourceId> {
        std::mem::take(&mut *lock(&self.owned))
    }

    pub fn push_undo(&self, resource: ResourceSlot<R>, operation: Arc<dyn ResourceOperation<R>>) {
        lock(&self.undo_log).push(UndoEntry { resource, operation });
    }

    pub fn undo_depth(&self) -> usize {
        lock(&self.undo_log).len()
    }

    /// Undo every logged operation, newest first. Returns how many ran.
    pub fn unwind(&self) -> usize {
        let mut undone = 0;
        loop {
            // Pop under the log lock, undo outside it.
            let entry = lock(&self.undo_log).pop();
            let Some(entry) = entry else { break };
            let mut resource = lock(&entry.resource);
            entry.operation.undo(&mut resource);
            undone += 1;
        }
        undone
    }

    pub fn info(&self) -> TransactionInfo {
        TransactionInfo {
            context: self.context_id(),
            created_at: self.created_at,
            aborted: self.is_aborted(),
            owned: self.owned_ids(),
            undo_depth: self.undo_depth(),
        }
    }
}

/// Point-in-time view of a registered transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    pub context: ContextId,
    pub created_at: i64,
    pub aborted: bool,
    pub owned: Vec<ResourceId>,
    pub undo_depth: usize,
}

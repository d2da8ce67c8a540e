use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::sync::lock;

/// Identifier of an execution context. At most one transaction is active per
/// context at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Something that can rouse every context blocked on it.
pub(crate) trait Wake: Send + Sync {
    fn wake_all(&self);
}

struct TokenInner {
    cancelled: AtomicBool,
    /// Where the owning context is currently parked, if anywhere.
    parked_on: Mutex<Option<Weak<dyn Wake>>>,
}

/// Cooperative cancellation signal for one execution context.
///
/// Polled while a transaction waits for a resource and right after an
/// operation has been applied. Observing the signal consumes it.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                parked_on: Mutex::new(None),
            }),
        }
    }

    /// Request cancellation, waking the context if it is blocked on a lock.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Clone out first: waking takes the lock-table mutex, which the
        // parking side holds while it registers here.
        let parked_on = lock(&self.inner.parked_on).clone();
        if let Some(target) = parked_on.and_then(|w| w.upgrade()) {
            target.wake_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Raise the flag without waking anyone. For callers that already hold
    /// the lock the context is parked on and broadcast themselves.
    pub(crate) fn signal(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Consume a pending cancellation.
    pub(crate) fn take(&self) -> bool {
        self.inner.cancelled.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn park(&self, on: Weak<dyn Wake>) {
        *lock(&self.inner.parked_on) = Some(on);
    }

    pub(crate) fn unpark(&self) {
        *lock(&self.inner.parked_on) = None;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle identifying the caller of every [`TransactionManager`](crate::TransactionManager)
/// operation. Cheap to clone; clones share one cancellation token.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: ContextId,
    token: CancellationToken,
}

impl ExecutionContext {
    /// Create the handle for context `id` with a fresh token.
    ///
    /// Build one handle per context and clone it wherever the context is
    /// used. The manager keys transactions by id but signals the token of the
    /// handle that started the transaction, so a second handle built with the
    /// same id names the same transaction while its `cancel` reaches nothing.
    pub fn new(id: u64) -> Self {
        Self {
            id: ContextId(id),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Deliver a cancellation not tied to deadlock resolution.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

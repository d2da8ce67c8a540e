//! Deadlock resolution through the public API.
//!
//! Every test drives real threads into a wait-for cycle and checks that
//! exactly the youngest transaction is aborted while the rest finish.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use oxitxn::{
    ContextId, Error, ExecutionContext, ManagerConfig, ManualClock, Resource, ResourceId,
    ResourceOperation, ResourceOperationError, TransactionManager,
};

// ---------------------------------------------------------------------------
// Test infrastructure
// ---------------------------------------------------------------------------

struct Register {
    id: String,
    value: i64,
}

impl Resource for Register {
    fn id(&self) -> ResourceId {
        ResourceId::new(self.id.clone())
    }
}

struct Add(i64);

impl ResourceOperation<Register> for Add {
    fn execute(&self, reg: &mut Register) -> Result<(), ResourceOperationError> {
        reg.value += self.0;
        Ok(())
    }

    fn undo(&self, reg: &mut Register) {
        reg.value -= self.0;
    }
}

fn add(n: i64) -> Arc<dyn ResourceOperation<Register>> {
    Arc::new(Add(n))
}

fn rid(s: &str) -> ResourceId {
    ResourceId::from(s)
}

fn manager(
    names: &[&str],
    clock: &Arc<ManualClock>,
    config: ManagerConfig,
) -> Arc<TransactionManager<Register>> {
    let registers = names.iter().map(|n| Register {
        id: n.to_string(),
        value: 0,
    });
    let clock: Arc<ManualClock> = Arc::clone(clock);
    let mgr = TransactionManager::with_config(registers, clock, config);
    Arc::new(mgr.unwrap())
}

fn value(mgr: &TransactionManager<Register>, id: &str) -> i64 {
    mgr.with_resource(&rid(id), |r| r.value).unwrap()
}

/// Spin until `ctx` shows up in the wait list of `id`.
fn wait_until_blocked(mgr: &TransactionManager<Register>, id: &str, ctx: ContextId) {
    while !mgr.waiters_of(&rid(id)).unwrap().contains(&ctx) {
        thread::sleep(Duration::from_millis(1));
    }
}

/// How a worker's transaction ended.
enum Outcome {
    Committed,
    Aborted,
}

/// Take `first`, meet everyone at the barrier, then take `second`.
fn cross(
    mgr: Arc<TransactionManager<Register>>,
    ctx: ExecutionContext,
    first: &'static str,
    second: &'static str,
    barrier: Arc<Barrier>,
) -> thread::JoinHandle<Outcome> {
    thread::spawn(move || {
        mgr.operate_on_resource(&ctx, &rid(first), add(1)).unwrap();
        barrier.wait();
        match mgr.operate_on_resource(&ctx, &rid(second), add(10)) {
            Ok(()) => {
                mgr.commit_transaction(&ctx).unwrap();
                Outcome::Committed
            }
            Err(Error::ActiveTransactionAborted) => {
                assert!(mgr.is_transaction_aborted(&ctx));
                assert!(matches!(
                    mgr.commit_transaction(&ctx),
                    Err(Error::ActiveTransactionAborted)
                ));
                assert!(matches!(
                    mgr.operate_on_resource(&ctx, &rid("missing"), add(1)),
                    Err(Error::ActiveTransactionAborted)
                ));
                mgr.rollback_transaction(&ctx);
                assert!(!mgr.is_transaction_active(&ctx));
                Outcome::Aborted
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn two_way_cycle_aborts_younger() {
    let clock = Arc::new(ManualClock::new(100));
    let mgr = manager(&["r1", "r2"], &clock, ManagerConfig::default());
    let (c1, c2) = (ExecutionContext::new(1), ExecutionContext::new(2));

    mgr.start_transaction(&c1).unwrap();
    clock.set(200);
    mgr.start_transaction(&c2).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let h1 = cross(Arc::clone(&mgr), c1, "r1", "r2", Arc::clone(&barrier));
    let h2 = cross(Arc::clone(&mgr), c2, "r2", "r1", barrier);

    assert!(matches!(h1.join().unwrap(), Outcome::Committed));
    assert!(matches!(h2.join().unwrap(), Outcome::Aborted));

    assert_eq!(value(&mgr, "r1"), 1);
    assert_eq!(value(&mgr, "r2"), 10);
    assert_eq!(mgr.owner_of(&rid("r1")).unwrap(), None);
    assert_eq!(mgr.owner_of(&rid("r2")).unwrap(), None);

    let stats = mgr.stats();
    assert_eq!(stats.deadlocks_resolved, 1);
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(stats.active, 0);
}

#[test]
fn equal_timestamps_abort_larger_context_id() {
    let clock = Arc::new(ManualClock::new(500));
    let mgr = manager(&["r1", "r2"], &clock, ManagerConfig::default());
    let (small, large) = (ExecutionContext::new(3), ExecutionContext::new(8));
    mgr.start_transaction(&large).unwrap();
    mgr.start_transaction(&small).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let hs = cross(Arc::clone(&mgr), small, "r1", "r2", Arc::clone(&barrier));
    let hl = cross(Arc::clone(&mgr), large, "r2", "r1", barrier);

    assert!(matches!(hs.join().unwrap(), Outcome::Committed));
    assert!(matches!(hl.join().unwrap(), Outcome::Aborted));
    assert_eq!(value(&mgr, "r1"), 1);
    assert_eq!(value(&mgr, "r2"), 10);
}

#[test]
fn three_way_cycle_aborts_only_youngest() {
    let clock = Arc::new(ManualClock::new(100));
    let mgr = manager(&["a", "b", "c"], &clock, ManagerConfig::default());
    let ctxs: Vec<ExecutionContext> = (1..=3).map(ExecutionContext::new).collect();
    for ctx in &ctxs {
        mgr.start_transaction(ctx).unwrap();
        clock.advance(100);
    }

    let barrier = Arc::new(Barrier::new(3));
    let plan = [("a", "b"), ("b", "c"), ("c", "a")];
    let handles: Vec<_> = ctxs
        .iter()
        .zip(plan)
        .map(|(ctx, (first, second))| {
            let barrier = Arc::clone(&barrier);
            cross(Arc::clone(&mgr), ctx.clone(), first, second, barrier)
        })
        .collect();

    let outcomes: Vec<Outcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(matches!(outcomes[0], Outcome::Committed));
    assert!(matches!(outcomes[1], Outcome::Committed));
    assert!(matches!(outcomes[2], Outcome::Aborted));

    // ctx 3 took "c" then lost; ctx 2 later added 10 to "c".
    assert_eq!(value(&mgr, "a"), 1);
    assert_eq!(value(&mgr, "b"), 11);
    assert_eq!(value(&mgr, "c"), 10);
    assert_eq!(mgr.stats().deadlocks_resolved, 1);
}

#[test]
fn survivor_blocked_first_is_woken() {
    let clock = Arc::new(ManualClock::new(100));
    let mgr = manager(&["r1", "r2"], &clock, ManagerConfig::default());
    let (old, young) = (ExecutionContext::new(1), ExecutionContext::new(2));
    mgr.start_transaction(&old).unwrap();
    clock.set(200);
    mgr.start_transaction(&young).unwrap();

    mgr.operate_on_resource(&old, &rid("r1"), add(1)).unwrap();
    mgr.operate_on_resource(&young, &rid("r2"), add(1)).unwrap();

    let waiter = {
        let mgr = Arc::clone(&mgr);
        let old = old.clone();
        thread::spawn(move || mgr.operate_on_resource(&old, &rid("r2"), add(5)))
    };
    wait_until_blocked(&mgr, "r2", old.id());

    let err = mgr
        .operate_on_resource(&young, &rid("r1"), add(5))
        .unwrap_err();
    assert!(matches!(err, Error::ActiveTransactionAborted));
    assert!(mgr.is_transaction_aborted(&young));
    mgr.rollback_transaction(&young);

    waiter.join().unwrap().unwrap();
    assert_eq!(mgr.owner_of(&rid("r2")).unwrap(), Some(old.id()));
    mgr.commit_transaction(&old).unwrap();
    assert_eq!(value(&mgr, "r1"), 1);
    assert_eq!(value(&mgr, "r2"), 5);

    // The context that lost can start over cleanly.
    mgr.start_transaction(&young).unwrap();
    assert!(!mgr.is_transaction_aborted(&young));
    mgr.operate_on_resource(&young, &rid("r1"), add(2)).unwrap();
    mgr.commit_transaction(&young).unwrap();
    assert_eq!(value(&mgr, "r1"), 3);
}

#[test]
fn external_cancel_unblocks_without_abort() {
    let clock = Arc::new(ManualClock::new(0));
    let mgr = manager(&["r1"], &clock, ManagerConfig::default());
    let (holder, waiter) = (ExecutionContext::new(1), ExecutionContext::new(2));
    mgr.start_transaction(&holder).unwrap();
    mgr.start_transaction(&waiter).unwrap();
    mgr.operate_on_resource(&holder, &rid("r1"), add(1)).unwrap();

    let handle = {
        let mgr = Arc::clone(&mgr);
        let waiter = waiter.clone();
        thread::spawn(move || mgr.operate_on_resource(&waiter, &rid("r1"), add(1)))
    };
    wait_until_blocked(&mgr, "r1", waiter.id());
    waiter.cancel();

    assert!(matches!(handle.join().unwrap(), Err(Error::Cancelled)));
    assert!(mgr.is_transaction_active(&waiter));
    assert!(!mgr.is_transaction_aborted(&waiter));
    assert!(mgr.waiters_of(&rid("r1")).unwrap().is_empty());
    assert_eq!(mgr.owner_of(&rid("r1")).unwrap(), Some(holder.id()));

    mgr.commit_transaction(&holder).unwrap();
    mgr.commit_transaction(&waiter).unwrap();
    assert_eq!(value(&mgr, "r1"), 1);
}

#[test]
fn disabled_detection_waits_for_cancel() {
    let clock = Arc::new(ManualClock::new(100));
    let config = ManagerConfig {
        deadlock_detection: false,
    };
    let mgr = manager(&["r1", "r2"], &clock, config);
    let (c1, c2) = (ExecutionContext::new(1), ExecutionContext::new(2));
    mgr.start_transaction(&c1).unwrap();
    mgr.start_transaction(&c2).unwrap();
    mgr.operate_on_resource(&c1, &rid("r1"), add(1)).unwrap();
    mgr.operate_on_resource(&c2, &rid("r2"), add(1)).unwrap();

    let spawn = |ctx: &ExecutionContext, id: &'static str| {
        let mgr = Arc::clone(&mgr);
        let ctx = ctx.clone();
        thread::spawn(move || mgr.operate_on_resource(&ctx, &rid(id), add(1)))
    };
    let h1 = spawn(&c1, "r2");
    wait_until_blocked(&mgr, "r2", c1.id());
    let h2 = spawn(&c2, "r1");
    wait_until_blocked(&mgr, "r1", c2.id());

    thread::sleep(Duration::from_millis(20));
    assert!(!mgr.is_transaction_aborted(&c1));
    assert!(!mgr.is_transaction_aborted(&c2));

    c2.cancel();
    assert!(matches!(h2.join().unwrap(), Err(Error::Cancelled)));
    mgr.rollback_transaction(&c2);
    h1.join().unwrap().unwrap();
    mgr.commit_transaction(&c1).unwrap();

    assert_eq!(value(&mgr, "r1"), 1);
    assert_eq!(value(&mgr, "r2"), 1);
    assert_eq!(mgr.stats().deadlocks_resolved, 0);
}

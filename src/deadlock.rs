//! Wait-for cycle detection and victim selection.
//!
//! The wait-for graph is never built. Since a transaction blocks on at most
//! one resource, following "waits on → owned by" from any transaction yields
//! a single path, and a cycle is found by walking it.

use std::sync::Arc;

use crate::lock_table::TableState;
use crate::resource::ResourceId;
use crate::transaction::Transaction;

/// Look for a wait-for cycle closed by `caller` blocking on `wanted`.
///
/// Walks from the owner of `wanted`, one successor per step, for at most
/// `2 * active + 1` steps. Returns the transactions on the cycle in walk
/// order with `caller` last, or an empty vec.
pub(crate) fn find_cycle<R>(
    state: &TableState<R>,
    wanted: &ResourceId,
    caller: &Arc<Transaction<R>>,
    active: usize,
) -> Vec<Arc<Transaction<R>>> {
    let Some(mut current) = state.owner(wanted).cloned() else {
        return Vec::new();
    };
    let caller_owns = caller.owned_ids();
    if caller_owns.is_empty() {
        return Vec::new();
    }

    let mut path = Vec::new();
    for _ in 0..(2 * active + 1) {
        if Arc::ptr_eq(&current, caller) {
            break;
        }
        path.push(Arc::clone(&current));

        if caller_owns
            .iter()
            .any(|id| state.is_waiting_for(&current, id))
        {
            path.push(Arc::clone(caller));
            return path;
        }

        let next = state
            .waiting_on(&current)
            .and_then(|id| state.owner(id))
            .cloned();
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    Vec::new()
}

/// Pick the youngest member of `cycle`; equal ages go to the larger context id.
pub(crate) fn select_victim<R>(cycle: &[Arc<Transaction<R>>]) -> Option<&Arc<Transaction<R>>> {
    cycle.iter().max_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.context_id().cmp(&b.context_id()))
    })
}

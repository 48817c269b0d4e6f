// Per-session trigger flags.
//
// SAFETY INVARIANTS:
// 1. Only the caller that wins the `claimed` compare-exchange runs the action
// 2. `applied` is set once and never cleared
// 3. A failed run releases the claim so an independent retry can take it

use dashmap::DashMap;
use lexledger_core::SessionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct SessionTrigger {
    claimed: AtomicBool,
    applied: AtomicBool,
}

impl SessionTrigger {
    /// Single-writer-wins: true for exactly one caller until released.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub(crate) fn mark_applied(&self) {
        self.applied.store(true, Ordering::Release);
    }

    pub(crate) fn is_applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub(crate) struct SessionTriggers {
    inner: DashMap<SessionId, Arc<SessionTrigger>>,
}

impl SessionTriggers {
    pub(crate) fn get(&self, id: &SessionId) -> Arc<SessionTrigger> {
        self.inner.entry(id.clone()).or_default().clone()
    }

    /// Sessions whose action has not been applied yet.
    pub(crate) fn unapplied(&self) -> Vec<SessionId> {
        self.inner
            .iter()
            .filter(|entry| !entry.value().is_applied())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

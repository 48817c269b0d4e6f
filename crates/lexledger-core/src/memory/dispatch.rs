// Notification channel and directory doubles.

use crate::attestation::AttestationNotice;
use crate::errors::DispatchError;
use crate::ids::{LedgerAddress, UserId};
use crate::notify::{NotificationDispatcher, ParticipantDirectory};
use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps every delivered notice in order.
#[derive(Default)]
pub struct RecordingDispatcher {
    delivered: Mutex<Vec<AttestationNotice>>,
    failures: AtomicUsize,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<AttestationNotice> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notice: AttestationNotice) -> Result<(), DispatchError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DispatchError::Unavailable("injected delivery failure".into()));
        }
        debug!(
            "notice for {} ({}) on session {}",
            notice.target_user_id, notice.required_role, notice.session_id
        );
        self.delivered.lock().push(notice);
        Ok(())
    }
}

/// Fixed address book. Lookups ignore address letter case.
#[derive(Default)]
pub struct StaticDirectory {
    entries: DashMap<String, UserId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &LedgerAddress, user: UserId) {
        self.entries.insert(address.as_str().to_ascii_lowercase(), user);
    }
}

#[async_trait]
impl ParticipantDirectory for StaticDirectory {
    async fn user_for_address(&self, address: &LedgerAddress) -> Option<UserId> {
        self.entries
            .get(&address.as_str().to_ascii_lowercase())
            .map(|user| user.value().clone())
    }
}

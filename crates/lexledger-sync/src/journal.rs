// Sync-job journal: active jobs by id, archived jobs in completion order.
// The archive is a ring: past `capacity` the oldest finished job is evicted.

use dashmap::DashMap;
use lexledger_core::{CaseId, CaseSyncJob, ExternalCaseId, SyncOperation, SyncTerminalState};
use parking_lot::RwLock;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_ARCHIVE_CAPACITY: usize = 1_000;

pub struct SyncJournal {
    active: DashMap<String, CaseSyncJob>,
    archived: RwLock<VecDeque<CaseSyncJob>>,
    capacity: usize,
}

impl Default for SyncJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncJournal {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ARCHIVE_CAPACITY)
    }

    /// A capacity of zero is raised to one so the latest job stays visible.
    pub fn with_capacity(capacity: usize) -> Self {
        SyncJournal {
            active: DashMap::new(),
            archived: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn open(
        &self,
        operation: SyncOperation,
        external_case_id: ExternalCaseId,
        case_id: Option<CaseId>,
    ) -> String {
        let job = CaseSyncJob::new(operation, external_case_id, case_id);
        let id = job.id.clone();
        self.active.insert(id.clone(), job);
        id
    }

    pub fn record_attempt(&self, job_id: &str, error: Option<String>) {
        if let Some(mut job) = self.active.get_mut(job_id) {
            job.record_attempt(error);
        }
    }

    pub fn attach_case(&self, job_id: &str, case_id: CaseId) {
        if let Some(mut job) = self.active.get_mut(job_id) {
            job.case_id = Some(case_id);
        }
    }

    /// Close a job and move it to the archive.
    pub fn finish(&self, job_id: &str, state: SyncTerminalState, error: Option<String>) {
        if let Some((_, mut job)) = self.active.remove(job_id) {
            if error.is_some() {
                job.last_error = error;
            }
            job.finish(state);
            let mut archived = self.archived.write();
            while archived.len() >= self.capacity {
                if let Some(evicted) = archived.pop_front() {
                    debug!(job_id = %evicted.id, external_case_id = %evicted.external_case_id, "sync job evicted from archive");
                }
            }
            archived.push_back(job);
        }
    }

    pub fn active(&self) -> Vec<CaseSyncJob> {
        self.active.iter().map(|job| job.value().clone()).collect()
    }

    pub fn archived(&self) -> Vec<CaseSyncJob> {
        self.archived.read().iter().cloned().collect()
    }

    /// Take every archived job, oldest first, for hand-off to durable storage.
    pub fn drain_archived(&self) -> Vec<CaseSyncJob> {
        self.archived.write().drain(..).collect()
    }

    pub fn archived_for(&self, external_case_id: &ExternalCaseId) -> Vec<CaseSyncJob> {
        self.archived
            .read()
            .iter()
            .filter(|job| &job.external_case_id == external_case_id)
            .cloned()
            .collect()
    }
}

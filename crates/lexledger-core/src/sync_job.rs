// Sync jobs: one per mutating case action, archived on a terminal outcome.

use crate::ids::{CaseId, ExternalCaseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    ReassignJudge,
    ReassignLawyer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTerminalState {
    /// The record store reflects a ledger-verified state.
    Committed,
    /// The action ended without a verified ledger state; a divergent row may
    /// have been written.
    FailedUnsynced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSyncJob {
    pub id: String,
    /// Known only once the row exists; creates start without one.
    pub case_id: Option<CaseId>,
    pub external_case_id: ExternalCaseId,
    pub operation: SyncOperation,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub terminal_state: Option<SyncTerminalState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CaseSyncJob {
    pub fn new(
        operation: SyncOperation,
        external_case_id: ExternalCaseId,
        case_id: Option<CaseId>,
    ) -> Self {
        CaseSyncJob {
            id: Uuid::new_v4().to_string(),
            case_id,
            external_case_id,
            operation,
            attempts: 0,
            last_error: None,
            terminal_state: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub fn finish(&mut self, state: SyncTerminalState) {
        self.terminal_state = Some(state);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state.is_some()
    }
}

// Quorum trigger bounds.

use lexledger_core::{CourtError, CourtResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumPolicy {
    /// Bound on a single application of the quorum action.
    pub action_timeout_ms: u64,
    /// Re-reads after an optimistic-concurrency conflict on a request,
    /// session or case row.
    pub conflict_retries: u32,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        QuorumPolicy {
            action_timeout_ms: 30_000,
            conflict_retries: 3,
        }
    }
}

impl QuorumPolicy {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn validate(&self) -> CourtResult<()> {
        if self.action_timeout_ms == 0 {
            return Err(CourtError::InvalidInput("action_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

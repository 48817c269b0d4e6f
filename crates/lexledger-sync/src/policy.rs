// Retry and timeout bounds for ledger synchronization.

use crate::journal::DEFAULT_ARCHIVE_CAPACITY;
use lexledger_core::{CourtError, CourtResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower bound on the pause between verification reads.
pub const MIN_VERIFY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// Verification reads per ledger write.
    pub verify_attempts: u32,
    /// Fixed pause between verification reads, in milliseconds.
    pub verify_delay_ms: u64,
    /// Broadcast attempts for a ledger write on transient errors.
    pub submit_attempts: u32,
    /// Wall-clock bound on any single ledger call, in milliseconds.
    pub ledger_timeout_ms: u64,
    /// Re-reads after an optimistic-concurrency conflict on the case row.
    pub conflict_retries: u32,
    /// Finished sync jobs kept in the journal archive before eviction.
    pub archive_capacity: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            verify_attempts: 3,
            verify_delay_ms: 2_000,
            submit_attempts: 2,
            ledger_timeout_ms: 30_000,
            conflict_retries: 3,
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
        }
    }
}

impl SyncPolicy {
    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn validate(&self) -> CourtResult<()> {
        if self.verify_attempts == 0 {
            return Err(CourtError::InvalidInput("verify_attempts must be at least 1".into()));
        }
        if self.submit_attempts == 0 {
            return Err(CourtError::InvalidInput("submit_attempts must be at least 1".into()));
        }
        if self.verify_delay() < MIN_VERIFY_DELAY {
            return Err(CourtError::InvalidInput(format!(
                "verify_delay_ms must be at least {}",
                MIN_VERIFY_DELAY.as_millis()
            )));
        }
        if self.ledger_timeout_ms == 0 {
            return Err(CourtError::InvalidInput("ledger_timeout_ms must be positive".into()));
        }
        if self.archive_capacity == 0 {
            return Err(CourtError::InvalidInput("archive_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

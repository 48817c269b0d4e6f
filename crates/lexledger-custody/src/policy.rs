// Sealing bounds.

use lexledger_core::{CourtError, CourtResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealPolicy {
    /// How long the signer may take once the signing phase has begun.
    pub signer_timeout_ms: u64,
    /// Bound on the best-effort ledger audit call.
    pub ledger_timeout_ms: u64,
    /// Re-reads after an optimistic-concurrency conflict on the item row.
    pub conflict_retries: u32,
}

impl Default for SealPolicy {
    fn default() -> Self {
        SealPolicy {
            signer_timeout_ms: 120_000,
            ledger_timeout_ms: 30_000,
            conflict_retries: 3,
        }
    }
}

impl SealPolicy {
    pub fn signer_timeout(&self) -> Duration {
        Duration::from_millis(self.signer_timeout_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn validate(&self) -> CourtResult<()> {
        if self.signer_timeout_ms == 0 {
            return Err(CourtError::InvalidInput("signer_timeout_ms must be positive".into()));
        }
        if self.ledger_timeout_ms == 0 {
            return Err(CourtError::InvalidInput("ledger_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

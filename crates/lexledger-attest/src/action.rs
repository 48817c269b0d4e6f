// Downstream effect of a completed attestation session.

use async_trait::async_trait;
use lexledger_core::{AttestationSession, CourtError, CourtResult, RecordStore, StoreError};
use std::sync::Arc;
use tracing::{debug, info};

/// Applied once per session when every required role has signed.
///
/// Implementations must be idempotent: a retry after a partial failure may
/// call `apply` again for the same session.
#[async_trait]
pub trait QuorumAction: Send + Sync {
    async fn apply(&self, session: &AttestationSession) -> CourtResult<()>;
}

/// Default action: move the case to the session's target status.
pub struct AdvanceCaseStatus {
    store: Arc<dyn RecordStore>,
    conflict_retries: u32,
}

impl AdvanceCaseStatus {
    pub fn new(store: Arc<dyn RecordStore>, conflict_retries: u32) -> Self {
        AdvanceCaseStatus {
            store,
            conflict_retries,
        }
    }
}

#[async_trait]
impl QuorumAction for AdvanceCaseStatus {
    async fn apply(&self, session: &AttestationSession) -> CourtResult<()> {
        let mut case = self.store.get_case(&session.case_id).await?;
        for _ in 0..=self.conflict_retries {
            if case.status == session.target_status {
                debug!(case_id = %case.id, status = %case.status, "case already at target status");
                return Ok(());
            }
            let expected_version = case.version;
            let mut next = case.clone();
            next.advance_status(session.target_status)?;
            match self.store.update_case(next, expected_version).await {
                Ok(stored) => {
                    info!(case_id = %stored.id, status = %stored.status, session_id = %session.id, "case advanced on quorum");
                    return Ok(());
                }
                Err(StoreError::VersionConflict { .. }) => {
                    case = self.store.get_case(&session.case_id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CourtError::StaleWrite(format!(
            "case {} kept changing while applying session {}",
            session.case_id, session.id
        )))
    }
}

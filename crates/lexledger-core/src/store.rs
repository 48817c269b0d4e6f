// Record store interface.
//
// Updates are optimistic: the caller passes the version it read and the
// store rejects the write with `VersionConflict` if the row moved on. A
// successful update returns the row with its version incremented.

use crate::attestation::{AttestationRequest, AttestationSession};
use crate::case::Case;
use crate::errors::StoreResult;
use crate::evidence::EvidenceItem;
use crate::ids::{CaseId, EvidenceId, ExternalCaseId, RequestId, SessionId};
use async_trait::async_trait;

#[async_trait]
pub trait RecordStore: Send + Sync {
    // Cases

    /// Insert a new row. Fails with `Duplicate` if the id or the external
    /// case id is already present.
    async fn insert_case(&self, case: Case) -> StoreResult<Case>;
    async fn get_case(&self, id: &CaseId) -> StoreResult<Case>;
    async fn find_case_by_external_id(&self, id: &ExternalCaseId) -> StoreResult<Option<Case>>;
    async fn update_case(&self, case: Case, expected_version: u64) -> StoreResult<Case>;

    // Evidence

    async fn insert_evidence(&self, item: EvidenceItem) -> StoreResult<EvidenceItem>;
    async fn get_evidence(&self, id: &EvidenceId) -> StoreResult<EvidenceItem>;
    async fn update_evidence(&self, item: EvidenceItem, expected_version: u64)
        -> StoreResult<EvidenceItem>;
    async fn list_evidence_for_case(&self, case_id: &CaseId) -> StoreResult<Vec<EvidenceItem>>;

    // Attestation

    async fn insert_session(&self, session: AttestationSession) -> StoreResult<AttestationSession>;
    async fn get_session(&self, id: &SessionId) -> StoreResult<AttestationSession>;
    async fn update_session(
        &self,
        session: AttestationSession,
        expected_version: u64,
    ) -> StoreResult<AttestationSession>;

    /// Insert a request. Fails with `Duplicate` if the session already has a
    /// request for the same role.
    async fn insert_attestation_request(
        &self,
        request: AttestationRequest,
    ) -> StoreResult<AttestationRequest>;
    async fn get_attestation_request(&self, id: &RequestId) -> StoreResult<AttestationRequest>;
    async fn update_attestation_request(
        &self,
        request: AttestationRequest,
        expected_version: u64,
    ) -> StoreResult<AttestationRequest>;
    async fn list_requests_for_session(
        &self,
        session_id: &SessionId,
    ) -> StoreResult<Vec<AttestationRequest>>;
}

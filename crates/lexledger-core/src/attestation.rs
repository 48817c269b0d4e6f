// Multi-party attestation records.
//
// INVARIANTS:
// 1. Exactly one request per (session id, required role)
// 2. Siblings are grouped by the explicit `session_id` key only
// 3. Quorum = every role the session requires has a signed sibling request;
//    a missing request is never counted as signed
// 4. A signature, once applied, is never removed
// 5. An abandoned session never reaches quorum

use crate::case::{CaseStatus, ParticipantRole};
use crate::errors::{CourtError, CourtResult};
use crate::ids::{CaseId, RequestId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRequest {
    pub id: RequestId,
    pub session_id: SessionId,
    pub case_id: CaseId,
    pub required_role: ParticipantRole,
    pub target_user_id: UserId,
    /// Hex-encoded signature bytes.
    pub signature: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl AttestationRequest {
    pub fn new(
        session_id: SessionId,
        case_id: CaseId,
        required_role: ParticipantRole,
        target_user_id: UserId,
    ) -> Self {
        AttestationRequest {
            id: RequestId::generate(),
            session_id,
            case_id,
            required_role,
            target_user_id,
            signature: None,
            signed_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Bytes a signer attests to: SHA-256 over the JSON of
    /// (request id, session id, case id, role).
    pub fn message(&self) -> CourtResult<Vec<u8>> {
        let payload = (&self.id, &self.session_id, &self.case_id, self.required_role);
        let serialized = serde_json::to_vec(&payload)
            .map_err(|e| CourtError::InvalidInput(format!("attestation payload: {}", e)))?;
        Ok(Sha256::digest(&serialized).to_vec())
    }
}

/// Quorum for a session: every required role is covered by a signed
/// request of that session.
pub fn quorum_reached(session: &AttestationSession, siblings: &[AttestationRequest]) -> bool {
    if session.is_abandoned() || session.required_roles.is_empty() {
        return false;
    }
    session.required_roles.iter().all(|role| {
        siblings.iter().any(|request| {
            request.session_id == session.id && request.required_role == *role && request.is_signed()
        })
    })
}

/// Durable outcome of the downstream transition fired on quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TriggerState {
    Pending,
    Applied { at: DateTime<Utc> },
    Failed { attempts: u32, last_error: String },
    /// Registration failed partway; the session can never be completed.
    Abandoned { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSession {
    pub id: SessionId,
    pub case_id: CaseId,
    /// Status the case advances to once quorum is reached.
    pub target_status: CaseStatus,
    pub required_roles: Vec<ParticipantRole>,
    pub trigger: TriggerState,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl AttestationSession {
    pub fn is_abandoned(&self) -> bool {
        matches!(self.trigger, TriggerState::Abandoned { .. })
    }
}

/// Record emitted to the notification channel, one per required role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationNotice {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub case_id: CaseId,
    pub required_role: ParticipantRole,
    pub target_user_id: UserId,
}

impl From<&AttestationRequest> for AttestationNotice {
    fn from(request: &AttestationRequest) -> Self {
        AttestationNotice {
            request_id: request.id.clone(),
            session_id: request.session_id.clone(),
            case_id: request.case_id.clone(),
            required_role: request.required_role,
            target_user_id: request.target_user_id.clone(),
        }
    }
}

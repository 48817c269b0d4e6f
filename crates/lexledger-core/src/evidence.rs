// Evidence custody records.
//
// INVARIANTS:
// 1. Status moves forward only: draft -> pending -> signed -> immutable
// 2. A seal signature is bound to (evidence id, case id, file hash)
// 3. Once immutable, only annotations and the ledger-audit receipt change

use crate::errors::{CourtError, CourtResult};
use crate::ids::{CaseId, EvidenceId, TxHash, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Draft,
    Pending,
    Signed,
    Immutable,
}

impl EvidenceStatus {
    /// The single state reachable from `self`, if any.
    pub fn next(&self) -> Option<EvidenceStatus> {
        match self {
            EvidenceStatus::Draft => Some(EvidenceStatus::Pending),
            EvidenceStatus::Pending => Some(EvidenceStatus::Signed),
            EvidenceStatus::Signed => Some(EvidenceStatus::Immutable),
            EvidenceStatus::Immutable => None,
        }
    }
}

impl fmt::Display for EvidenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvidenceStatus::Draft => "draft",
            EvidenceStatus::Pending => "pending",
            EvidenceStatus::Signed => "signed",
            EvidenceStatus::Immutable => "immutable",
        };
        f.write_str(name)
    }
}

/// Descriptor of the stored file. The bytes themselves live in object
/// storage; only the content hash is bound into the seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Hex SHA-256 of the file content.
    pub hash: String,
    pub size: u64,
    pub name: String,
}

impl FileDescriptor {
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        FileDescriptor {
            hash: hex::encode(Sha256::digest(bytes)),
            size: bytes.len() as u64,
            name: name.into(),
        }
    }
}

/// Append-only note on an evidence item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub author: UserId,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Progress of the best-effort ledger audit write for a sealed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LedgerAuditState {
    NotRequested,
    Pending { attempts: u32, last_error: Option<String> },
    Recorded { tx_hash: TxHash },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: EvidenceId,
    pub case_id: CaseId,
    pub file: FileDescriptor,
    pub status: EvidenceStatus,
    pub uploader: UserId,
    pub sealer: Option<UserId>,
    /// Hex-encoded opaque signature.
    pub seal_signature: Option<String>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub annotations: Vec<Annotation>,
    pub ledger_audit: LedgerAuditState,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn new_draft(case_id: CaseId, file: FileDescriptor, uploader: UserId) -> Self {
        EvidenceItem {
            id: EvidenceId::generate(),
            case_id,
            file,
            status: EvidenceStatus::Draft,
            uploader,
            sealer: None,
            seal_signature: None,
            sealed_at: None,
            annotations: Vec::new(),
            ledger_audit: LedgerAuditState::NotRequested,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.status == EvidenceStatus::Immutable
    }

    /// Advance to `next`, rejecting anything but the single forward edge.
    pub fn transition(&mut self, next: EvidenceStatus) -> CourtResult<()> {
        if self.is_immutable() {
            return Err(CourtError::ImmutableEvidence(self.id.clone()));
        }
        if self.status.next() != Some(next) {
            return Err(CourtError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record the seal and move pending -> signed.
    pub fn apply_seal(&mut self, sealer: UserId, signature: &[u8]) -> CourtResult<()> {
        self.transition(EvidenceStatus::Signed)?;
        self.sealer = Some(sealer);
        self.seal_signature = Some(hex::encode(signature));
        self.sealed_at = Some(Utc::now());
        Ok(())
    }

    pub fn annotate(&mut self, author: UserId, note: impl Into<String>) {
        self.annotations.push(Annotation {
            author,
            note: note.into(),
            at: Utc::now(),
        });
    }
}

/// The payload a judge signs when sealing. Field order is fixed so the
/// serialized bytes are canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealPayload {
    pub evidence_id: EvidenceId,
    pub case_id: CaseId,
    pub file_hash: String,
}

impl SealPayload {
    pub fn for_item(item: &EvidenceItem) -> Self {
        SealPayload {
            evidence_id: item.id.clone(),
            case_id: item.case_id.clone(),
            file_hash: item.file.hash.clone(),
        }
    }

    /// Canonical message handed to the signer: SHA-256 over the JSON form.
    pub fn message(&self) -> CourtResult<Vec<u8>> {
        let serialized = serde_json::to_vec(self)
            .map_err(|e| CourtError::InvalidInput(format!("seal payload: {}", e)))?;
        Ok(Sha256::digest(&serialized).to_vec())
    }
}

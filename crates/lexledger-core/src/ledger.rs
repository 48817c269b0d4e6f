// Ledger client interface.
//
// The ledger is authoritative for case identity and role addresses. Reads
// report unassigned slots with the zero-address sentinel.

use crate::case::{LedgerParticipants, LedgerRole};
use crate::errors::LedgerResult;
use crate::ids::{EvidenceId, ExternalCaseId, LedgerAddress, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arguments of the case-creation transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseCreateTx {
    pub external_case_id: ExternalCaseId,
    pub title: String,
    pub fir_ref: String,
    pub prosecution: LedgerAddress,
    pub defence: LedgerAddress,
    pub judge: LedgerAddress,
    pub metadata: BTreeMap<String, String>,
}

/// Case header as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCase {
    pub id: String,
    pub title: String,
    pub status: String,
}

/// Audit record written after an evidence item is sealed off-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSealTx {
    pub external_case_id: ExternalCaseId,
    pub evidence_id: EvidenceId,
    pub file_hash: String,
    /// Hex-encoded seal signature.
    pub signature: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit_case_create(&self, tx: CaseCreateTx) -> LedgerResult<TxHash>;

    async fn submit_reassign(
        &self,
        id: &ExternalCaseId,
        role: LedgerRole,
        address: &LedgerAddress,
    ) -> LedgerResult<TxHash>;

    async fn read_case(&self, id: &ExternalCaseId) -> LedgerResult<LedgerCase>;

    async fn read_participants(&self, id: &ExternalCaseId) -> LedgerResult<LedgerParticipants>;

    async fn record_evidence_seal(&self, tx: EvidenceSealTx) -> LedgerResult<TxHash>;
}

// Simulated ledger.
//
// Holds a case registry keyed by external case id, counts every call and
// lets callers script read results and inject failures, so the coordinators
// can be driven through lag, rejection and outage without a node.

use crate::case::{LedgerParticipants, LedgerRole};
use crate::errors::{LedgerError, LedgerResult};
use crate::ids::{ExternalCaseId, LedgerAddress, TxHash};
use crate::ledger::{CaseCreateTx, EvidenceSealTx, LedgerCase, LedgerClient};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerCall {
    SubmitCaseCreate,
    SubmitReassign,
    ReadCase,
    ReadParticipants,
    RecordEvidenceSeal,
}

#[derive(Debug, Clone)]
struct LedgerCaseRecord {
    title: String,
    status: String,
    participants: LedgerParticipants,
}

pub struct InMemoryLedger {
    cases: DashMap<ExternalCaseId, LedgerCaseRecord>,
    clerk: LedgerAddress,
    nonce: AtomicU64,
    calls: Mutex<HashMap<LedgerCall, usize>>,
    submitted_creates: Mutex<Vec<(TxHash, CaseCreateTx)>>,
    recorded_seals: Mutex<Vec<(TxHash, EvidenceSealTx)>>,
    scripted_participant_reads: Mutex<VecDeque<LedgerResult<LedgerParticipants>>>,
    submit_failures: Mutex<VecDeque<LedgerError>>,
    reassign_failures: Mutex<VecDeque<LedgerError>>,
    seal_failures: Mutex<VecDeque<LedgerError>>,
    visibility_lag: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new(clerk: LedgerAddress) -> Self {
        InMemoryLedger {
            cases: DashMap::new(),
            clerk,
            nonce: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            submitted_creates: Mutex::new(Vec::new()),
            recorded_seals: Mutex::new(Vec::new()),
            scripted_participant_reads: Mutex::new(VecDeque::new()),
            submit_failures: Mutex::new(VecDeque::new()),
            reassign_failures: Mutex::new(VecDeque::new()),
            seal_failures: Mutex::new(VecDeque::new()),
            visibility_lag: AtomicUsize::new(0),
        }
    }

    fn count(&self, call: LedgerCall) {
        *self.calls.lock().entry(call).or_insert(0) += 1;
    }

    fn next_tx_hash(&self, payload: &[u8]) -> TxHash {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hasher.update(nonce.to_be_bytes());
        TxHash::new(format!("0x{}", hex::encode(hasher.finalize())))
    }

    pub fn call_count(&self, call: LedgerCall) -> usize {
        self.calls.lock().get(&call).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn submitted_creates(&self) -> Vec<(TxHash, CaseCreateTx)> {
        self.submitted_creates.lock().clone()
    }

    pub fn recorded_seals(&self) -> Vec<(TxHash, EvidenceSealTx)> {
        self.recorded_seals.lock().clone()
    }

    /// Queue results returned by the next participant reads, ahead of the
    /// registry.
    pub fn script_participant_reads(&self, reads: Vec<LedgerResult<LedgerParticipants>>) {
        self.scripted_participant_reads.lock().extend(reads);
    }

    pub fn fail_next_submits(&self, errors: Vec<LedgerError>) {
        self.submit_failures.lock().extend(errors);
    }

    pub fn fail_next_reassigns(&self, errors: Vec<LedgerError>) {
        self.reassign_failures.lock().extend(errors);
    }

    pub fn fail_next_seal_records(&self, errors: Vec<LedgerError>) {
        self.seal_failures.lock().extend(errors);
    }

    /// The next `reads` participant reads see all slots unassigned, as if
    /// the transaction were not yet included.
    pub fn set_visibility_lag(&self, reads: usize) {
        self.visibility_lag.store(reads, Ordering::SeqCst);
    }

    pub fn participants(&self, id: &ExternalCaseId) -> Option<LedgerParticipants> {
        self.cases.get(id).map(|record| record.participants.clone())
    }

    /// Change a slot directly, simulating a write made by another client.
    pub fn force_participant(&self, id: &ExternalCaseId, role: LedgerRole, address: LedgerAddress) {
        if let Some(mut record) = self.cases.get_mut(id) {
            record.participants.set_address(role, address);
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit_case_create(&self, tx: CaseCreateTx) -> LedgerResult<TxHash> {
        self.count(LedgerCall::SubmitCaseCreate);
        if let Some(err) = self.submit_failures.lock().pop_front() {
            return Err(err);
        }
        let payload = serde_json::to_vec(&tx).map_err(|e| LedgerError::Reverted(e.to_string()))?;
        if self.cases.contains_key(&tx.external_case_id) {
            return Err(LedgerError::AlreadyRegistered(tx.external_case_id.to_string()));
        }
        let tx_hash = self.next_tx_hash(&payload);
        self.cases.insert(
            tx.external_case_id.clone(),
            LedgerCaseRecord {
                title: tx.title.clone(),
                status: "filed".to_string(),
                participants: LedgerParticipants {
                    judge: tx.judge.clone(),
                    clerk: self.clerk.clone(),
                    prosecution: tx.prosecution.clone(),
                    defence: tx.defence.clone(),
                },
            },
        );
        info!("ledger: case {} registered in {}", tx.external_case_id, tx_hash);
        self.submitted_creates.lock().push((tx_hash.clone(), tx));
        Ok(tx_hash)
    }

    async fn submit_reassign(
        &self,
        id: &ExternalCaseId,
        role: LedgerRole,
        address: &LedgerAddress,
    ) -> LedgerResult<TxHash> {
        self.count(LedgerCall::SubmitReassign);
        if let Some(err) = self.reassign_failures.lock().pop_front() {
            return Err(err);
        }
        if role == LedgerRole::Clerk {
            return Err(LedgerError::RoleAuthorization(
                "clerk slot is managed by the ledger".into(),
            ));
        }
        let mut record = self
            .cases
            .get_mut(id)
            .ok_or_else(|| LedgerError::CaseNotFound(id.to_string()))?;
        record.participants.set_address(role, address.clone());
        let tx_hash = self.next_tx_hash(format!("{}:{}:{}", id, role, address).as_bytes());
        debug!("ledger: {} {} -> {} in {}", id, role, address, tx_hash);
        Ok(tx_hash)
    }

    async fn read_case(&self, id: &ExternalCaseId) -> LedgerResult<LedgerCase> {
        self.count(LedgerCall::ReadCase);
        let record = self
            .cases
            .get(id)
            .ok_or_else(|| LedgerError::CaseNotFound(id.to_string()))?;
        Ok(LedgerCase {
            id: id.to_string(),
            title: record.title.clone(),
            status: record.status.clone(),
        })
    }

    async fn read_participants(&self, id: &ExternalCaseId) -> LedgerResult<LedgerParticipants> {
        self.count(LedgerCall::ReadParticipants);
        if let Some(scripted) = self.scripted_participant_reads.lock().pop_front() {
            return scripted;
        }
        let lagging = self
            .visibility_lag
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lagging {
            return Ok(LedgerParticipants::unassigned());
        }
        self.cases
            .get(id)
            .map(|record| record.participants.clone())
            .ok_or_else(|| LedgerError::CaseNotFound(id.to_string()))
    }

    async fn record_evidence_seal(&self, tx: EvidenceSealTx) -> LedgerResult<TxHash> {
        self.count(LedgerCall::RecordEvidenceSeal);
        if let Some(err) = self.seal_failures.lock().pop_front() {
            return Err(err);
        }
        if !self.cases.contains_key(&tx.external_case_id) {
            return Err(LedgerError::CaseNotFound(tx.external_case_id.to_string()));
        }
        let payload = serde_json::to_vec(&tx).map_err(|e| LedgerError::Reverted(e.to_string()))?;
        let tx_hash = self.next_tx_hash(&payload);
        self.recorded_seals.lock().push((tx_hash.clone(), tx));
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn addr(n: u8) -> LedgerAddress {
        LedgerAddress::new(format!("0x{:040x}", n))
    }

    fn create_tx(id: &ExternalCaseId) -> CaseCreateTx {
        CaseCreateTx {
            external_case_id: id.clone(),
            title: "State v. Roe".into(),
            fir_ref: "FIR-1".into(),
            prosecution: addr(2),
            defence: addr(3),
            judge: addr(1),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_lag_then_visible() {
        let ledger = InMemoryLedger::new(addr(9));
        let id = ExternalCaseId::mint();
        ledger.submit_case_create(create_tx(&id)).await.unwrap();
        ledger.set_visibility_lag(1);

        let first = ledger.read_participants(&id).await.unwrap();
        assert!(first.judge.is_zero());
        let second = ledger.read_participants(&id).await.unwrap();
        assert_eq!(second.judge, addr(1));
        assert_eq!(second.clerk, addr(9));
        assert_eq!(ledger.call_count(LedgerCall::ReadParticipants), 2);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_refused() {
        let ledger = InMemoryLedger::new(addr(9));
        let id = ExternalCaseId::mint();
        ledger.submit_case_create(create_tx(&id)).await.unwrap();
        let err = ledger.submit_case_create(create_tx(&id)).await.unwrap_err();
        assert_eq!(err, LedgerError::AlreadyRegistered(id.to_string()));
    }

    #[tokio::test]
    async fn test_clerk_slot_is_not_reassignable() {
        let ledger = InMemoryLedger::new(addr(9));
        let id = ExternalCaseId::mint();
        ledger.submit_case_create(create_tx(&id)).await.unwrap();
        let err = ledger.submit_reassign(&id, LedgerRole::Clerk, &addr(5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::RoleAuthorization(_)));
    }
}

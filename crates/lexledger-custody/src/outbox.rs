// Ledger audit outbox.
//
// Holds seal audits the ledger has not yet acknowledged, and receipts the
// ledger acknowledged but the item row has not yet stored. Entries leave the
// outbox only once the receipt is on the item.

use dashmap::DashMap;
use lexledger_core::{EvidenceId, EvidenceSealTx, TxHash};

#[derive(Debug, Clone)]
pub(crate) struct QueuedAudit {
    pub tx: EvidenceSealTx,
    pub attempts: u32,
    pub last_error: String,
    /// Set once the ledger accepted the write.
    pub receipt: Option<TxHash>,
}

#[derive(Default)]
pub(crate) struct AuditOutbox {
    entries: DashMap<EvidenceId, QueuedAudit>,
}

impl AuditOutbox {
    pub(crate) fn enqueue(&self, tx: EvidenceSealTx, attempts: u32, error: String) {
        self.entries.insert(
            tx.evidence_id.clone(),
            QueuedAudit {
                tx,
                attempts,
                last_error: error,
                receipt: None,
            },
        );
    }

    pub(crate) fn enqueue_receipt(&self, tx: EvidenceSealTx, receipt: TxHash, error: String) {
        self.entries.insert(
            tx.evidence_id.clone(),
            QueuedAudit {
                tx,
                attempts: 1,
                last_error: error,
                receipt: Some(receipt),
            },
        );
    }

    pub(crate) fn snapshot(&self) -> Vec<QueuedAudit> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub(crate) fn contains(&self, id: &EvidenceId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn record_failure(&self, id: &EvidenceId, error: String) -> u32 {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.attempts += 1;
                entry.last_error = error;
                entry.attempts
            }
            None => 0,
        }
    }

    pub(crate) fn record_receipt(&self, id: &EvidenceId, receipt: TxHash) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.receipt = Some(receipt);
        }
    }

    pub(crate) fn remove(&self, id: &EvidenceId) {
        self.entries.remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// EVIDENCE CUSTODY MANAGER
// Evidence lifecycle and judge sealing.
//
// SAFETY INVARIANTS:
// 1. draft -> pending -> signed -> immutable, never backwards
// 2. At most one seal per item is in flight; the rest get `AlreadyInProgress`
// 3. Cancellation is honoured only before the signer is asked
// 4. The off-chain seal is authoritative; a failed ledger audit never
//    reverts it and is retried from the outbox
// 5. Immutable items accept annotations and audit receipts only
// 6. The seal write also marks the audit pending, so a seal interrupted
//    after signing is found again by `requeue_pending_audits`

use crate::claim::{SealClaims, SealPhase};
use crate::outbox::AuditOutbox;
use crate::policy::SealPolicy;
use lexledger_core::{
    Actor, CaseId, CourtError, CourtResult, EvidenceId, EvidenceItem, EvidenceSealTx,
    EvidenceStatus, FileDescriptor, LedgerAuditState, LedgerClient, LedgerError, RecordStore,
    SealPayload, Signer, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealOutcome {
    pub evidence_id: EvidenceId,
    /// `Immutable` once committed. `Signed` if the final commit write failed;
    /// `finalize_signed` completes it.
    pub status: EvidenceStatus,
    /// Hex-encoded seal signature.
    pub signature: String,
    pub ledger_audit: LedgerAuditState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSweep {
    pub recorded: Vec<EvidenceId>,
    pub still_pending: Vec<EvidenceId>,
}

pub struct EvidenceCustodyManager {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerClient>,
    policy: SealPolicy,
    claims: SealClaims,
    outbox: AuditOutbox,
}

impl EvidenceCustodyManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerClient>,
        policy: SealPolicy,
    ) -> CourtResult<Self> {
        policy.validate()?;
        Ok(EvidenceCustodyManager {
            store,
            ledger,
            policy,
            claims: SealClaims::default(),
            outbox: AuditOutbox::default(),
        })
    }

    pub fn policy(&self) -> &SealPolicy {
        &self.policy
    }

    /// The canonical bytes a judge signs for `item`.
    pub fn seal_message(item: &EvidenceItem) -> CourtResult<Vec<u8>> {
        SealPayload::for_item(item).message()
    }

    pub async fn get(&self, id: &EvidenceId) -> CourtResult<EvidenceItem> {
        Ok(self.store.get_evidence(id).await?)
    }

    pub async fn list_for_case(&self, case_id: &CaseId) -> CourtResult<Vec<EvidenceItem>> {
        Ok(self.store.list_evidence_for_case(case_id).await?)
    }

    /// Phase of the seal currently running on `id`, if any.
    pub fn seal_phase(&self, id: &EvidenceId) -> Option<SealPhase> {
        self.claims.phase_of(id)
    }

    pub fn seals_in_flight(&self) -> usize {
        self.claims.in_flight()
    }

    pub fn pending_audit_count(&self) -> usize {
        self.outbox.len()
    }

    pub async fn register_upload(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        file: FileDescriptor,
    ) -> CourtResult<EvidenceItem> {
        require_upload(actor)?;
        if file.hash.trim().is_empty() {
            return Err(CourtError::InvalidInput("file descriptor has no content hash".into()));
        }
        self.store.get_case(case_id).await?;
        let item = EvidenceItem::new_draft(case_id.clone(), file, actor.user_id.clone());
        let stored = self.store.insert_evidence(item).await?;
        info!(evidence_id = %stored.id, case_id = %case_id, uploader = %actor.user_id, "evidence registered");
        Ok(stored)
    }

    pub async fn submit_for_review(&self, actor: &Actor, id: &EvidenceId) -> CourtResult<EvidenceItem> {
        require_upload(actor)?;
        let stored = self
            .update_item(id, |item| item.transition(EvidenceStatus::Pending))
            .await?;
        info!(evidence_id = %id, by = %actor.user_id, "evidence submitted for review");
        Ok(stored)
    }

    /// Append a note. Allowed in every status, including immutable.
    pub async fn annotate(
        &self,
        actor: &Actor,
        id: &EvidenceId,
        note: &str,
    ) -> CourtResult<EvidenceItem> {
        require_upload(actor)?;
        if note.trim().is_empty() {
            return Err(CourtError::InvalidInput("annotation is empty".into()));
        }
        let author = actor.user_id.clone();
        self.update_item(id, |item| {
            item.annotate(author.clone(), note);
            Ok(())
        })
        .await
    }

    pub async fn seal(
        &self,
        id: &EvidenceId,
        actor: &Actor,
        signer: &dyn Signer,
    ) -> CourtResult<SealOutcome> {
        self.seal_with_cancel(id, actor, signer, &CancellationToken::new())
            .await
    }

    /// Seal a pending item: confirm, wait for the signer, broadcast the
    /// audit, commit to immutable.
    pub async fn seal_with_cancel(
        &self,
        id: &EvidenceId,
        actor: &Actor,
        signer: &dyn Signer,
        cancel: &CancellationToken,
    ) -> CourtResult<SealOutcome> {
        if !actor.role.can_seal() {
            return Err(CourtError::MissingCapability {
                user: actor.user_id.clone(),
                capability: "seal",
            });
        }
        if signer.signer_id() != &actor.user_id {
            return Err(CourtError::InvalidInput(format!(
                "signer {} does not act for {}",
                signer.signer_id(),
                actor.user_id
            )));
        }
        let claim = self
            .claims
            .try_claim(id)
            .ok_or_else(|| CourtError::AlreadyInProgress(id.clone()))?;

        let item = self.store.get_evidence(id).await?;
        if item.is_immutable() {
            return Err(CourtError::ImmutableEvidence(id.clone()));
        }
        if item.status != EvidenceStatus::Pending {
            return Err(CourtError::InvalidTransition {
                from: item.status.to_string(),
                to: EvidenceStatus::Signed.to_string(),
            });
        }
        let message = Self::seal_message(&item)?;

        if cancel.is_cancelled() {
            info!(evidence_id = %id, "seal cancelled before signing");
            return Err(CourtError::Cancelled);
        }

        claim.advance(SealPhase::AwaitingSigner);
        let limit = self.policy.signer_timeout();
        let signature = match tokio::time::timeout(limit, signer.sign(&message)).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(err)) => {
                warn!(evidence_id = %id, error = %err, "signer refused seal");
                return Err(err.into());
            }
            Err(_) => {
                warn!(evidence_id = %id, after = ?limit, "signer did not answer; item stays pending");
                return Err(CourtError::Timeout {
                    operation: "seal signer",
                    after: limit,
                });
            }
        };

        let sealer = actor.user_id.clone();
        let signed = self
            .update_item(id, |item| {
                item.apply_seal(sealer.clone(), &signature)?;
                item.ledger_audit = LedgerAuditState::Pending {
                    attempts: 0,
                    last_error: None,
                };
                Ok(())
            })
            .await?;
        info!(evidence_id = %id, sealer = %actor.user_id, "evidence signed");

        claim.advance(SealPhase::Broadcasting);
        let audit = self.broadcast_audit(&signed).await;

        claim.advance(SealPhase::Committing);
        let recorded = audit.clone();
        match self
            .update_item(id, |item| {
                item.transition(EvidenceStatus::Immutable)?;
                item.ledger_audit = recorded.clone();
                Ok(())
            })
            .await
        {
            Ok(committed) => {
                info!(evidence_id = %id, "evidence immutable");
                Ok(SealOutcome {
                    evidence_id: committed.id,
                    status: committed.status,
                    signature: committed.seal_signature.unwrap_or_default(),
                    ledger_audit: committed.ledger_audit,
                })
            }
            Err(err) => {
                warn!(evidence_id = %id, error = %err, "signed evidence not committed; finalize_signed will complete it");
                if let LedgerAuditState::Recorded { tx_hash } = &audit {
                    if let Ok(tx) = self.audit_tx(&signed).await {
                        self.outbox
                            .enqueue_receipt(tx, tx_hash.clone(), err.to_string());
                    }
                }
                Ok(SealOutcome {
                    evidence_id: signed.id,
                    status: EvidenceStatus::Signed,
                    signature: signed.seal_signature.unwrap_or_default(),
                    ledger_audit: audit,
                })
            }
        }
    }

    /// Commit an item left in `signed` to `immutable`. Already-immutable
    /// items are returned as they are.
    pub async fn finalize_signed(&self, id: &EvidenceId) -> CourtResult<EvidenceItem> {
        let item = self.store.get_evidence(id).await?;
        if item.is_immutable() {
            return Ok(item);
        }
        let committed = self
            .update_item(id, |item| item.transition(EvidenceStatus::Immutable))
            .await?;
        info!(evidence_id = %id, "signed evidence finalized");
        Ok(committed)
    }

    /// Re-attempt every queued ledger audit, then store the receipts.
    pub async fn retry_ledger_audits(&self) -> AuditSweep {
        let mut sweep = AuditSweep::default();
        for queued in self.outbox.snapshot() {
            let id = queued.tx.evidence_id.clone();
            let receipt = match queued.receipt {
                Some(receipt) => receipt,
                None => match bounded(self.policy.ledger_timeout(), self.ledger.record_evidence_seal(queued.tx.clone())).await {
                    Ok(tx_hash) => {
                        self.outbox.record_receipt(&id, tx_hash.clone());
                        tx_hash
                    }
                    Err(err) => {
                        let attempts = self.outbox.record_failure(&id, err.to_string());
                        warn!(evidence_id = %id, attempts, error = %err, "ledger audit still failing");
                        let state = LedgerAuditState::Pending {
                            attempts,
                            last_error: Some(err.to_string()),
                        };
                        if let Err(store_err) = self.set_audit_state(&id, state).await {
                            debug!(evidence_id = %id, error = %store_err, "audit attempt not stored");
                        }
                        sweep.still_pending.push(id);
                        continue;
                    }
                },
            };
            match self
                .set_audit_state(&id, LedgerAuditState::Recorded { tx_hash: receipt.clone() })
                .await
            {
                Ok(_) => {
                    self.outbox.remove(&id);
                    info!(evidence_id = %id, tx_hash = %receipt, "ledger audit recorded");
                    sweep.recorded.push(id);
                }
                Err(err) => {
                    self.outbox.record_failure(&id, err.to_string());
                    warn!(evidence_id = %id, error = %err, "audit receipt not stored");
                    sweep.still_pending.push(id);
                }
            }
        }
        sweep
    }

    /// Recover seals that stopped part way, e.g. after a restart or a
    /// dropped seal call. Signed items are committed to immutable, and every
    /// sealed item whose audit is not recorded is queued unless a seal on
    /// this manager still holds it. Returns how many audits were queued.
    pub async fn requeue_pending_audits(&self, case_id: &CaseId) -> CourtResult<usize> {
        let mut queued = 0;
        for item in self.store.list_evidence_for_case(case_id).await? {
            if item.status < EvidenceStatus::Signed || self.claims.phase_of(&item.id).is_some() {
                continue;
            }
            let attempts = match &item.ledger_audit {
                LedgerAuditState::Pending { attempts, .. } => *attempts,
                LedgerAuditState::NotRequested => 0,
                LedgerAuditState::Recorded { .. } => continue,
            };
            if item.status == EvidenceStatus::Signed {
                match self.finalize_signed(&item.id).await {
                    Ok(_) => info!(evidence_id = %item.id, "interrupted seal finalized"),
                    Err(err) => {
                        warn!(evidence_id = %item.id, error = %err, "interrupted seal not finalized")
                    }
                }
            }
            if self.outbox.contains(&item.id) {
                continue;
            }
            let tx = self.audit_tx(&item).await?;
            self.outbox
                .enqueue(tx, attempts, "requeued from record store".into());
            queued += 1;
        }
        Ok(queued)
    }

    async fn broadcast_audit(&self, signed: &EvidenceItem) -> LedgerAuditState {
        let tx = match self.audit_tx(signed).await {
            Ok(tx) => tx,
            Err(err) => {
                warn!(evidence_id = %signed.id, error = %err, "ledger audit not built");
                return LedgerAuditState::Pending {
                    attempts: 0,
                    last_error: Some(err.to_string()),
                };
            }
        };
        match bounded(self.policy.ledger_timeout(), self.ledger.record_evidence_seal(tx.clone())).await {
            Ok(tx_hash) => {
                info!(evidence_id = %signed.id, tx_hash = %tx_hash, "seal recorded on ledger");
                LedgerAuditState::Recorded { tx_hash }
            }
            Err(err) => {
                warn!(evidence_id = %signed.id, error = %err, "ledger audit failed; queued");
                self.outbox.enqueue(tx, 1, err.to_string());
                LedgerAuditState::Pending {
                    attempts: 1,
                    last_error: Some(err.to_string()),
                }
            }
        }
    }

    async fn audit_tx(&self, item: &EvidenceItem) -> CourtResult<EvidenceSealTx> {
        let signature = item.seal_signature.clone().ok_or_else(|| {
            CourtError::InvalidInput(format!("evidence {} carries no seal signature", item.id))
        })?;
        let case = self.store.get_case(&item.case_id).await?;
        Ok(EvidenceSealTx {
            external_case_id: case.external_case_id,
            evidence_id: item.id.clone(),
            file_hash: item.file.hash.clone(),
            signature,
        })
    }

    async fn set_audit_state(&self, id: &EvidenceId, state: LedgerAuditState) -> CourtResult<EvidenceItem> {
        self.update_item(id, |item| {
            item.ledger_audit = state.clone();
            Ok(())
        })
        .await
    }

    /// Read-modify-write with optimistic concurrency. `apply` runs again on
    /// the fresh row after every version conflict.
    async fn update_item<F>(&self, id: &EvidenceId, mut apply: F) -> CourtResult<EvidenceItem>
    where
        F: FnMut(&mut EvidenceItem) -> CourtResult<()> + Send,
    {
        let mut current = self.store.get_evidence(id).await?;
        for _ in 0..=self.policy.conflict_retries {
            let expected_version = current.version;
            let mut next = current.clone();
            apply(&mut next)?;
            match self.store.update_evidence(next, expected_version).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(evidence_id = %id, "evidence row moved; re-applying");
                    current = self.store.get_evidence(id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CourtError::StaleWrite(format!(
            "evidence {} kept changing; gave up after {} conflict retries",
            id, self.policy.conflict_retries
        )))
    }
}

fn require_upload(actor: &Actor) -> CourtResult<()> {
    if actor.role.can_upload() {
        Ok(())
    } else {
        Err(CourtError::MissingCapability {
            user: actor.user_id.clone(),
            capability: "upload",
        })
    }
}

async fn bounded<T>(
    limit: std::time::Duration,
    call: impl std::future::Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout(limit)),
    }
}

// CASE SYNC COORDINATOR
// Ledger-write-then-verify-then-commit for case creation and reassignment.
//
// SAFETY INVARIANTS:
// 1. The record store never holds a case identity the ledger has not
//    confirmed; it is a verified projection, never a leading write
// 2. `external_case_id` is minted once, before any write, and reused
//    verbatim on every retry
// 3. A candidate without a ledger address fails before any ledger call
// 4. Cancellation is honoured only before the ledger broadcast
// 5. Divergence between the stores is recorded and reported, never hidden
// 6. A create is rebroadcast only after a read shows the case absent; an
//    earlier broadcast that landed is adopted, not reported as a failure

use crate::journal::SyncJournal;
use crate::policy::SyncPolicy;
use crate::verification::{bounded, Expectation, Verifier};
use chrono::Utc;
use dashmap::DashMap;
use lexledger_core::{
    Assignment, Candidate, Case, CaseCreateTx, CaseDraft, CaseId, CaseStatus, CourtError,
    CourtResult, DivergenceReport, ExternalCaseId, LedgerClient, LedgerError, LedgerParticipants,
    ParticipantDirectory, ParticipantRole, RecordStore, StoreError, SyncOperation, SyncState,
    SyncTerminalState, TxHash,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCaseOutcome {
    pub case_id: CaseId,
    pub external_case_id: ExternalCaseId,
    /// `Verified` once committed; `Pending` if the verified row is queued
    /// for a commit retry.
    pub sync_state: SyncState,
    /// `None` when an earlier broadcast whose receipt was lost is adopted.
    pub tx_hash: Option<TxHash>,
    pub verification_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignOptions {
    /// Record the assignment without writing to the ledger.
    pub skip_ledger: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassignOutcome {
    pub case_id: CaseId,
    pub role: ParticipantRole,
    pub sync_state: SyncState,
    pub tx_hash: Option<TxHash>,
    /// Present whenever the stored row disagrees with the ledger.
    pub divergence: Option<DivergenceReport>,
    /// The ledger failure that left the row divergent, if any.
    pub ledger_error: Option<CourtError>,
}

impl ReassignOutcome {
    pub fn is_divergent(&self) -> bool {
        self.sync_state == SyncState::Divergent
    }
}

/// A verified case whose record-store write failed.
#[derive(Debug, Clone)]
pub(crate) struct PendingCommit {
    pub case: Case,
    pub job_id: String,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSweep {
    pub committed: Vec<ExternalCaseId>,
    pub still_pending: Vec<ExternalCaseId>,
}

pub struct CaseSyncCoordinator {
    pub(crate) ledger: Arc<dyn LedgerClient>,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) directory: Option<Arc<dyn ParticipantDirectory>>,
    pub(crate) policy: SyncPolicy,
    pub(crate) journal: SyncJournal,
    pub(crate) pending_commits: DashMap<ExternalCaseId, PendingCommit>,
}

impl CaseSyncCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RecordStore>,
        policy: SyncPolicy,
    ) -> CourtResult<Self> {
        policy.validate()?;
        Ok(CaseSyncCoordinator {
            ledger,
            store,
            directory: None,
            journal: SyncJournal::with_capacity(policy.archive_capacity),
            policy,
            pending_commits: DashMap::new(),
        })
    }

    /// Directory used when rebuilding rows from ledger data alone.
    pub fn with_directory(mut self, directory: Arc<dyn ParticipantDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn journal(&self) -> &SyncJournal {
        &self.journal
    }

    pub async fn create_case(&self, draft: CaseDraft) -> CourtResult<CreateCaseOutcome> {
        self.create_case_with_cancel(draft, &CancellationToken::new()).await
    }

    pub async fn create_case_with_cancel(
        &self,
        draft: CaseDraft,
        cancel: &CancellationToken,
    ) -> CourtResult<CreateCaseOutcome> {
        if draft.title.trim().is_empty() {
            return Err(CourtError::InvalidInput("case title is empty".into()));
        }
        let participants = draft.resolve_participants()?;

        let external_case_id = ExternalCaseId::mint();
        let job_id = self
            .journal
            .open(SyncOperation::Create, external_case_id.clone(), None);

        if cancel.is_cancelled() {
            self.journal
                .finish(&job_id, SyncTerminalState::FailedUnsynced, Some("cancelled".into()));
            return Err(CourtError::Cancelled);
        }

        let tx = CaseCreateTx {
            external_case_id: external_case_id.clone(),
            title: draft.title.clone(),
            fir_ref: draft.fir_ref.clone(),
            prosecution: participants.prosecution.ledger_address.clone(),
            defence: participants.defence.ledger_address.clone(),
            judge: participants.judge.ledger_address.clone(),
            metadata: draft.metadata.clone(),
        };
        let tx_hash = match self.submit_with_retry(&job_id, &external_case_id, tx).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                error!(external_case_id = %external_case_id, error = %err, "case create not broadcast");
                self.journal
                    .finish(&job_id, SyncTerminalState::FailedUnsynced, Some(err.to_string()));
                return Err(err);
            }
        };
        info!(external_case_id = %external_case_id, tx_hash = ?tx_hash, "case create broadcast");

        let verifier = Verifier::new(self.ledger.as_ref(), &self.policy);
        let verified = match verifier
            .verify(&external_case_id, &Expectation::CaseCreated, |err| {
                self.journal.record_attempt(&job_id, err)
            })
            .await
        {
            Ok(verified) => verified,
            Err(err) => {
                error!(external_case_id = %external_case_id, error = %err, "case create not verified");
                self.journal
                    .finish(&job_id, SyncTerminalState::FailedUnsynced, Some(err.to_string()));
                return Err(err);
            }
        };

        let now = Utc::now();
        let mut case = Case {
            id: CaseId::generate(),
            external_case_id: external_case_id.clone(),
            title: draft.title,
            fir_ref: draft.fir_ref,
            status: CaseStatus::Filed,
            participants,
            ledger_participants: verified.participants,
            sync_state: SyncState::Verified,
            tx_hash: tx_hash.clone(),
            metadata: draft.metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        case.sync_state = case.derived_sync_state();
        if case.sync_state == SyncState::Divergent {
            warn!(
                external_case_id = %external_case_id,
                roles = ?case.divergence().iter().map(|d| d.role).collect::<Vec<_>>(),
                "ledger holds different addresses than submitted"
            );
        }
        self.journal.attach_case(&job_id, case.id.clone());

        let case_id = case.id.clone();
        let committed_state = case.sync_state;
        match self.store.insert_case(case.clone()).await {
            Ok(_) => {
                self.journal.finish(&job_id, SyncTerminalState::Committed, None);
                info!(external_case_id = %external_case_id, case_id = %case_id, "case committed");
                Ok(CreateCaseOutcome {
                    case_id,
                    external_case_id,
                    sync_state: committed_state,
                    tx_hash,
                    verification_attempts: verified.attempts,
                })
            }
            Err(err) => {
                warn!(
                    external_case_id = %external_case_id,
                    error = %err,
                    "verified case not committed; queued for retry"
                );
                self.journal.record_attempt(&job_id, Some(err.to_string()));
                self.pending_commits.insert(
                    external_case_id.clone(),
                    PendingCommit {
                        case,
                        job_id,
                        attempts: 1,
                        last_error: err.to_string(),
                    },
                );
                Ok(CreateCaseOutcome {
                    case_id,
                    external_case_id,
                    sync_state: SyncState::Pending,
                    tx_hash,
                    verification_attempts: verified.attempts,
                })
            }
        }
    }

    /// Broadcast the create transaction. Transient failures are retried with
    /// the same external id; exhaustion surfaces as a verification failure.
    ///
    /// A timed-out or dropped broadcast may still land. Before every
    /// rebroadcast the ledger is read, and a case already present under the
    /// external id is taken as this create having landed (`Ok(None)`).
    async fn submit_with_retry(
        &self,
        job_id: &str,
        external_case_id: &ExternalCaseId,
        tx: CaseCreateTx,
    ) -> CourtResult<Option<TxHash>> {
        let limit = self.policy.ledger_timeout();
        let mut last_error = String::new();
        for attempt in 1..=self.policy.submit_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.verify_delay()).await;
                if self.already_landed(external_case_id).await {
                    info!(external_case_id = %external_case_id, attempt, "earlier case create landed; not rebroadcasting");
                    self.journal.record_attempt(job_id, None);
                    return Ok(None);
                }
            }
            match bounded(limit, self.ledger.submit_case_create(tx.clone())).await {
                Ok(tx_hash) => {
                    self.journal.record_attempt(job_id, None);
                    return Ok(Some(tx_hash));
                }
                Err(LedgerError::AlreadyRegistered(_)) if attempt > 1 => {
                    info!(external_case_id = %external_case_id, attempt, "rebroadcast found the case registered");
                    self.journal.record_attempt(job_id, None);
                    return Ok(None);
                }
                Err(err) if err.is_retryable() => {
                    warn!(external_case_id = %external_case_id, attempt, error = %err, "case create broadcast failed");
                    self.journal.record_attempt(job_id, Some(err.to_string()));
                    last_error = err.to_string();
                }
                Err(err) => {
                    self.journal.record_attempt(job_id, Some(err.to_string()));
                    return Err(err.into());
                }
            }
        }
        Err(CourtError::LedgerVerificationFailed {
            external_case_id: external_case_id.clone(),
            attempts: self.policy.submit_attempts,
            last_error,
        })
    }

    /// Whether the ledger already holds a case under `id`. Any read failure
    /// counts as absent; a duplicate rebroadcast is refused by the ledger.
    async fn already_landed(&self, id: &ExternalCaseId) -> bool {
        match bounded(self.policy.ledger_timeout(), self.ledger.read_case(id)).await {
            Ok(case) => case.id == id.as_str(),
            Err(err) => {
                debug!(external_case_id = %id, error = %err, "case not readable before rebroadcast");
                false
            }
        }
    }

    /// Re-attempt record-store writes of verified cases. A row that already
    /// exists counts as committed.
    pub async fn retry_pending_commits(&self) -> CommitSweep {
        let mut sweep = CommitSweep::default();
        let keys: Vec<ExternalCaseId> = self.pending_commits.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let pending = match self.pending_commits.get(&key) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };
            match self.store.insert_case(pending.case.clone()).await {
                Ok(_) | Err(StoreError::Duplicate { .. }) => {
                    self.pending_commits.remove(&key);
                    self.journal.finish(&pending.job_id, SyncTerminalState::Committed, None);
                    info!(external_case_id = %key, attempts = pending.attempts + 1, "pending case committed");
                    sweep.committed.push(key);
                }
                Err(err) => {
                    warn!(external_case_id = %key, error = %err, "pending case commit failed again");
                    self.journal.record_attempt(&pending.job_id, Some(err.to_string()));
                    if let Some(mut entry) = self.pending_commits.get_mut(&key) {
                        entry.attempts += 1;
                        entry.last_error = err.to_string();
                    }
                    sweep.still_pending.push(key);
                }
            }
        }
        sweep
    }

    pub fn pending_commit_count(&self) -> usize {
        self.pending_commits.len()
    }

    /// Last commit error of a queued case, if it is queued.
    pub fn pending_commit_error(&self, id: &ExternalCaseId) -> Option<String> {
        self.pending_commits.get(id).map(|p| p.last_error.clone())
    }

    pub async fn reassign_participant(
        &self,
        case_id: &CaseId,
        role: ParticipantRole,
        candidate: Candidate,
        options: ReassignOptions,
    ) -> CourtResult<ReassignOutcome> {
        self.reassign_participant_with_cancel(case_id, role, candidate, options, &CancellationToken::new())
            .await
    }

    pub async fn reassign_participant_with_cancel(
        &self,
        case_id: &CaseId,
        role: ParticipantRole,
        candidate: Candidate,
        options: ReassignOptions,
        cancel: &CancellationToken,
    ) -> CourtResult<ReassignOutcome> {
        let assignment = candidate.resolve(role)?;
        let case = self.store.get_case(case_id).await?;
        let previous = case.participants.get(role).clone();
        let operation = match role {
            ParticipantRole::Judge => SyncOperation::ReassignJudge,
            ParticipantRole::Prosecution | ParticipantRole::Defence => SyncOperation::ReassignLawyer,
        };
        let external_case_id = case.external_case_id.clone();
        let job_id = self
            .journal
            .open(operation, external_case_id.clone(), Some(case_id.clone()));

        if options.skip_ledger {
            let cause = "ledger sync skipped".to_string();
            let stored = self
                .apply_assignment(case, role, &previous, assignment, None)
                .await
                .map_err(|err| {
                    self.journal
                        .finish(&job_id, SyncTerminalState::FailedUnsynced, Some(err.to_string()));
                    err
                })?;
            warn!(external_case_id = %external_case_id, role = %role, "assignment recorded without ledger sync");
            self.journal
                .finish(&job_id, SyncTerminalState::FailedUnsynced, Some(cause.clone()));
            return Ok(Self::outcome(stored, role, None, Some(cause), None));
        }

        if cancel.is_cancelled() {
            self.journal
                .finish(&job_id, SyncTerminalState::FailedUnsynced, Some("cancelled".into()));
            return Err(CourtError::Cancelled);
        }

        let ledger_result = self
            .submit_reassign_with_retry(&job_id, &external_case_id, role, &assignment)
            .await;
        let tx_hash = match ledger_result {
            Ok(tx_hash) => tx_hash,
            Err(CourtError::UserRejected) => {
                self.journal.finish(
                    &job_id,
                    SyncTerminalState::FailedUnsynced,
                    Some(CourtError::UserRejected.to_string()),
                );
                return Err(CourtError::UserRejected);
            }
            Err(err) => {
                return self
                    .record_divergent(&job_id, case, role, &previous, assignment, err)
                    .await;
            }
        };

        let verifier = Verifier::new(self.ledger.as_ref(), &self.policy);
        let expectation = Expectation::RoleAssigned {
            role,
            address: assignment.ledger_address.clone(),
        };
        match verifier
            .verify(&external_case_id, &expectation, |err| self.journal.record_attempt(&job_id, err))
            .await
        {
            Ok(verified) => {
                let confirmed = verified
                    .participants
                    .address_of(role.ledger_role())
                    .clone();
                let stored = self
                    .apply_assignment(
                        case,
                        role,
                        &previous,
                        assignment,
                        Some((confirmed, tx_hash.clone())),
                    )
                    .await
                    .map_err(|err| {
                        self.journal
                            .finish(&job_id, SyncTerminalState::FailedUnsynced, Some(err.to_string()));
                        err
                    })?;
                self.journal.finish(&job_id, SyncTerminalState::Committed, None);
                info!(external_case_id = %external_case_id, role = %role, tx_hash = %tx_hash, "reassignment verified");
                Ok(Self::outcome(stored, role, Some(tx_hash), None, None))
            }
            Err(err) => {
                self.record_divergent(&job_id, case, role, &previous, assignment, err)
                    .await
            }
        }
    }

    async fn submit_reassign_with_retry(
        &self,
        job_id: &str,
        external_case_id: &ExternalCaseId,
        role: ParticipantRole,
        assignment: &Assignment,
    ) -> CourtResult<TxHash> {
        let limit = self.policy.ledger_timeout();
        let mut last_error = String::new();
        for attempt in 1..=self.policy.submit_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.verify_delay()).await;
            }
            let call = self.ledger.submit_reassign(
                external_case_id,
                role.ledger_role(),
                &assignment.ledger_address,
            );
            match bounded(limit, call).await {
                Ok(tx_hash) => {
                    self.journal.record_attempt(job_id, None);
                    return Ok(tx_hash);
                }
                Err(err) if err.is_retryable() => {
                    warn!(external_case_id = %external_case_id, role = %role, attempt, error = %err, "reassignment broadcast failed");
                    self.journal.record_attempt(job_id, Some(err.to_string()));
                    last_error = err.to_string();
                }
                Err(err) => {
                    self.journal.record_attempt(job_id, Some(err.to_string()));
                    if let LedgerError::RoleAuthorization(reason) = &err {
                        warn!(external_case_id = %external_case_id, role = %role, %reason, "ledger refused candidate");
                    }
                    return Err(err.into());
                }
            }
        }
        Err(CourtError::LedgerVerificationFailed {
            external_case_id: external_case_id.clone(),
            attempts: self.policy.submit_attempts,
            last_error,
        })
    }

    /// Store the new assignment even though the ledger does not confirm it.
    async fn record_divergent(
        &self,
        job_id: &str,
        case: Case,
        role: ParticipantRole,
        previous: &Assignment,
        assignment: Assignment,
        cause: CourtError,
    ) -> CourtResult<ReassignOutcome> {
        warn!(
            external_case_id = %case.external_case_id,
            role = %role,
            error = %cause,
            "ledger did not confirm reassignment; recording divergent assignment"
        );
        let stored = match self.apply_assignment(case, role, previous, assignment, None).await {
            Ok(stored) => stored,
            Err(err) => {
                self.journal
                    .finish(job_id, SyncTerminalState::FailedUnsynced, Some(err.to_string()));
                return Err(err);
            }
        };
        self.journal
            .finish(job_id, SyncTerminalState::FailedUnsynced, Some(cause.to_string()));
        Ok(Self::outcome(stored, role, None, Some(cause.to_string()), Some(cause)))
    }

    /// Write one role's assignment with optimistic concurrency.
    ///
    /// On a version conflict the row is re-read and the change re-applied,
    /// but only while the role still holds `previous` (or already holds the
    /// new assignment). Anything else means another editor moved the role and
    /// the write is stale.
    pub(crate) async fn apply_assignment(
        &self,
        mut current: Case,
        role: ParticipantRole,
        previous: &Assignment,
        assignment: Assignment,
        ledger_confirmation: Option<(lexledger_core::LedgerAddress, TxHash)>,
    ) -> CourtResult<Case> {
        for _ in 0..=self.policy.conflict_retries {
            let held = current.participants.get(role);
            if held != previous && held != &assignment {
                return Err(CourtError::StaleWrite(format!(
                    "{} of case {} was reassigned to {} concurrently",
                    role, current.id, held.user_id
                )));
            }
            let expected_version = current.version;
            let mut next = current.clone();
            next.participants.set(role, assignment.clone());
            if let Some((address, tx_hash)) = &ledger_confirmation {
                next.ledger_participants
                    .set_address(role.ledger_role(), address.clone());
                next.tx_hash = Some(tx_hash.clone());
            }
            next.sync_state = next.derived_sync_state();
            next.updated_at = Utc::now();
            match self.store.update_case(next, expected_version).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(case_id = %current.id, role = %role, "case row moved; re-applying assignment");
                    current = self.store.get_case(&current.id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CourtError::StaleWrite(format!(
            "case {} kept changing; gave up after {} conflict retries",
            current.id, self.policy.conflict_retries
        )))
    }

    fn outcome(
        stored: Case,
        role: ParticipantRole,
        tx_hash: Option<TxHash>,
        cause: Option<String>,
        ledger_error: Option<CourtError>,
    ) -> ReassignOutcome {
        let report = stored.divergence_report(cause);
        let divergence = if report.is_empty() { None } else { Some(report) };
        ReassignOutcome {
            case_id: stored.id.clone(),
            role,
            sync_state: stored.sync_state,
            tx_hash,
            divergence,
            ledger_error,
        }
    }

    /// Ledger slots as currently read, bounded by the ledger timeout.
    pub(crate) async fn read_ledger_participants(
        &self,
        id: &ExternalCaseId,
    ) -> CourtResult<LedgerParticipants> {
        Ok(bounded(self.policy.ledger_timeout(), self.ledger.read_participants(id)).await?)
    }
}

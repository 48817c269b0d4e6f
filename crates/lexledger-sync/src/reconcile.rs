// Reconciliation read paths.
//
// Reconciliation refreshes what the record store knows about the ledger and
// rebuilds rows the store lost. It never rewrites application assignments:
// resolving a divergent assignment is a manual decision.

use crate::coordinator::CaseSyncCoordinator;
use crate::verification::{bounded, Expectation, Verifier};
use chrono::Utc;
use lexledger_core::{
    Assignment, Case, CaseId, CaseStatus, CourtError, CourtResult, DivergenceReport,
    ExternalCaseId, LedgerParticipants, Participants, ParticipantRole, StoreError, SyncState,
    SyncTerminalState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A case as every consumer should render it: the row plus an explicit
/// divergence report whenever the stores disagree.
#[derive(Debug, Clone, Serialize)]
pub struct CaseView {
    pub case: Case,
    pub sync_state: SyncState,
    pub divergence: Option<DivergenceReport>,
    /// True while a verified row is still queued for its first commit.
    pub commit_pending: bool,
}

fn parse_ledger_status(status: &str) -> CaseStatus {
    match status.to_ascii_lowercase().as_str() {
        "active" => CaseStatus::Active,
        "hearing" => CaseStatus::Hearing,
        "verdict_pending" | "verdictpending" => CaseStatus::VerdictPending,
        "closed" => CaseStatus::Closed,
        "appealed" => CaseStatus::Appealed,
        _ => CaseStatus::Filed,
    }
}

impl CaseSyncCoordinator {
    pub async fn case_view(&self, case_id: &CaseId) -> CourtResult<CaseView> {
        let case = self.store.get_case(case_id).await?;
        let report = case.divergence_report(None);
        let divergence = if report.is_empty() && case.sync_state != SyncState::Divergent {
            None
        } else {
            Some(report)
        };
        Ok(CaseView {
            sync_state: case.sync_state,
            commit_pending: self.pending_commits.contains_key(&case.external_case_id),
            case,
            divergence,
        })
    }

    /// Gate for actions that must only run on ledger-confirmed cases.
    pub async fn require_verified(&self, case_id: &CaseId) -> CourtResult<Case> {
        let case = self.store.get_case(case_id).await?;
        let divergence = case.divergence();
        if case.sync_state != SyncState::Verified || !divergence.is_empty() {
            return Err(CourtError::DivergentState {
                case_id: case.id.clone(),
                roles: divergence.iter().map(|d| d.role).collect(),
            });
        }
        Ok(case)
    }

    /// Re-read the ledger slots of a case and refresh the stored view of
    /// them. Returns the resulting divergence report (empty when verified).
    pub async fn reconcile(&self, case_id: &CaseId) -> CourtResult<DivergenceReport> {
        let mut current = self.store.get_case(case_id).await?;
        let on_ledger = self.read_ledger_participants(&current.external_case_id).await?;
        for _ in 0..=self.policy.conflict_retries {
            let expected_version = current.version;
            let mut next = current.clone();
            next.ledger_participants = on_ledger.clone();
            next.sync_state = next.derived_sync_state();
            next.updated_at = Utc::now();
            match self.store.update_case(next, expected_version).await {
                Ok(stored) => {
                    let report = stored.divergence_report(None);
                    if report.is_empty() {
                        info!(case_id = %stored.id, "case reconciled with ledger");
                    } else {
                        warn!(case_id = %stored.id, roles = ?report.role_names(), "case still diverges from ledger");
                    }
                    return Ok(report);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    current = self.store.get_case(case_id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CourtError::StaleWrite(format!(
            "case {} kept changing during reconciliation",
            case_id
        )))
    }

    /// Rebuild a missing record-store row from the ledger.
    ///
    /// An existing row is returned untouched. A queued verified row is
    /// committed as-is. Otherwise the ledger is read (and must pass the same
    /// checks as creation verification) and the participants are resolved
    /// through the participant directory.
    pub async fn rebuild_from_ledger(&self, external_case_id: &ExternalCaseId) -> CourtResult<Case> {
        if let Some(existing) = self.store.find_case_by_external_id(external_case_id).await? {
            return Ok(existing);
        }

        if let Some(pending) = self
            .pending_commits
            .get(external_case_id)
            .map(|entry| entry.value().clone())
        {
            let stored = match self.store.insert_case(pending.case.clone()).await {
                Ok(stored) => stored,
                Err(StoreError::Duplicate { .. }) => self
                    .store
                    .find_case_by_external_id(external_case_id)
                    .await?
                    .ok_or_else(|| {
                        CourtError::Store(StoreError::NotFound {
                            kind: "case",
                            id: external_case_id.to_string(),
                        })
                    })?,
                Err(err) => return Err(err.into()),
            };
            self.pending_commits.remove(external_case_id);
            self.journal
                .finish(&pending.job_id, SyncTerminalState::Committed, None);
            info!(external_case_id = %external_case_id, "queued case committed by rebuild");
            return Ok(stored);
        }

        let verifier = Verifier::new(self.ledger.as_ref(), &self.policy);
        let verified = verifier
            .verify(external_case_id, &Expectation::CaseCreated, |_| {})
            .await?;
        let header = bounded(self.policy.ledger_timeout(), self.ledger.read_case(external_case_id)).await?;
        let participants = self.resolve_participants(&verified.participants).await?;

        let now = Utc::now();
        let mut metadata = BTreeMap::new();
        metadata.insert("rebuilt_from_ledger".to_string(), now.to_rfc3339());
        let mut case = Case {
            id: CaseId::generate(),
            external_case_id: external_case_id.clone(),
            title: header.title,
            fir_ref: String::new(),
            status: parse_ledger_status(&header.status),
            participants,
            ledger_participants: verified.participants,
            sync_state: SyncState::Verified,
            tx_hash: None,
            metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        case.sync_state = case.derived_sync_state();
        let stored = self.store.insert_case(case).await?;
        info!(external_case_id = %external_case_id, case_id = %stored.id, "case rebuilt from ledger");
        Ok(stored)
    }

    async fn resolve_participants(&self, on_ledger: &LedgerParticipants) -> CourtResult<Participants> {
        Ok(Participants {
            judge: self.resolve_role(on_ledger, ParticipantRole::Judge).await?,
            prosecution: self.resolve_role(on_ledger, ParticipantRole::Prosecution).await?,
            defence: self.resolve_role(on_ledger, ParticipantRole::Defence).await?,
        })
    }

    async fn resolve_role(
        &self,
        on_ledger: &LedgerParticipants,
        role: ParticipantRole,
    ) -> CourtResult<Assignment> {
        let directory = self.directory.as_ref().ok_or_else(|| {
            CourtError::InvalidInput("no participant directory configured for rebuild".into())
        })?;
        let address = on_ledger.address_of(role.ledger_role()).clone();
        let user_id = directory.user_for_address(&address).await.ok_or_else(|| {
            CourtError::InvalidInput(format!("no user registered for {} address {}", role, address))
        })?;
        Ok(Assignment {
            user_id,
            ledger_address: address,
        })
    }
}

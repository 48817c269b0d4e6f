// Full case lifecycle against the in-process adapters: create, reassign,
// reconcile, seal evidence, and finalize a session by attestation quorum.

use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use lexledger_attest::AttestationQuorumTracker;
use lexledger_core::memory::{
    HmacSigner, InMemoryLedger, InMemoryRecordStore, RecordingDispatcher, StaticDirectory,
};
use lexledger_core::{
    Actor, ActorRole, Candidate, CaseDraft, CaseStatus, EvidenceStatus, ExternalCaseId,
    FileDescriptor, LedgerAddress, LedgerAuditState, LedgerError, ParticipantRole, RecordStore,
    Signer, SyncState, TriggerState,
};
use lexledger_custody::EvidenceCustodyManager;
use lexledger_sync::{CaseSyncCoordinator, ReassignOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleReport {
    pub external_case_id: ExternalCaseId,
    pub create_sync_state: SyncState,
    pub verification_attempts: u32,
    pub skipped_reassign_state: SyncState,
    pub divergent_roles_after_reconcile: Vec<ParticipantRole>,
    pub verified_reassign_state: SyncState,
    pub evidence_status: EvidenceStatus,
    pub ledger_audit: LedgerAuditState,
    pub session_trigger: TriggerState,
    pub final_case_status: CaseStatus,
    pub archived_sync_jobs: usize,
}

struct Party {
    role: ParticipantRole,
    user: &'static str,
    address: LedgerAddress,
}

fn address(seed: u8) -> LedgerAddress {
    LedgerAddress::new(format!("0x{:040x}", seed))
}

pub async fn run_lifecycle(settings: &Settings) -> Result<LifecycleReport> {
    let ledger = Arc::new(InMemoryLedger::new(LedgerAddress::new(
        settings.simulation.clerk_address.clone(),
    )));
    let store = Arc::new(InMemoryRecordStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let directory = Arc::new(StaticDirectory::new());

    let parties = [
        Party { role: ParticipantRole::Judge, user: "judge-rao", address: address(0x11) },
        Party { role: ParticipantRole::Prosecution, user: "pp-iyer", address: address(0x22) },
        Party { role: ParticipantRole::Defence, user: "adv-khan", address: address(0x33) },
    ];
    for party in &parties {
        directory.register(&party.address, party.user.into());
    }

    let coordinator = CaseSyncCoordinator::new(ledger.clone(), store.clone(), settings.sync.clone())?
        .with_directory(directory.clone());
    let custody = EvidenceCustodyManager::new(store.clone(), ledger.clone(), settings.seal.clone())?;
    let tracker =
        AttestationQuorumTracker::new(store.clone(), dispatcher.clone(), settings.quorum.clone())?;

    // Case creation, with the ledger lagging behind the broadcast.
    ledger.set_visibility_lag(settings.simulation.visibility_lag);
    let candidate = |role: ParticipantRole| {
        let party = parties.iter().find(|p| p.role == role);
        party.map(|p| Candidate::new(p.user, Some(p.address.clone())))
    };
    let (Some(judge), Some(prosecution), Some(defence)) = (
        candidate(ParticipantRole::Judge),
        candidate(ParticipantRole::Prosecution),
        candidate(ParticipantRole::Defence),
    ) else {
        bail!("simulation parties are incomplete");
    };
    let created = coordinator
        .create_case(CaseDraft {
            title: "State v. Mehta".into(),
            fir_ref: "FIR-2024-118".into(),
            judge,
            prosecution,
            defence,
            metadata: BTreeMap::from([("court".to_string(), "sessions-7".to_string())]),
        })
        .await
        .context("creating case")?;
    info!(external_case_id = %created.external_case_id, attempts = created.verification_attempts, "case created");

    // An offline reassignment shows up as divergence until the ledger agrees.
    let replacement = Candidate::new("adv-pillai", Some(address(0x44)));
    directory.register(&address(0x44), "adv-pillai".into());
    let skipped = coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Defence,
            replacement.clone(),
            ReassignOptions { skip_ledger: true },
        )
        .await
        .context("recording offline reassignment")?;
    let report = coordinator.reconcile(&created.case_id).await?;
    let verified = coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Defence,
            replacement,
            ReassignOptions::default(),
        )
        .await
        .context("syncing reassignment")?;
    coordinator.require_verified(&created.case_id).await?;

    // Evidence: upload, review, judge seal.
    let clerk = Actor::new("clerk-bose", ActorRole::Clerk);
    let judge = Actor::new("judge-rao", ActorRole::Judge).with_address(address(0x11));
    let judge_signer = HmacSigner::new("judge-rao", b"judge-rao-key".to_vec());
    if settings.simulation.ledger_audit_failures > 0 {
        let failures = (0..settings.simulation.ledger_audit_failures)
            .map(|_| LedgerError::Network("audit endpoint unavailable".into()))
            .collect();
        ledger.fail_next_seal_records(failures);
    }
    let item = custody
        .register_upload(
            &clerk,
            &created.case_id,
            FileDescriptor::from_bytes("forensic-report.pdf", b"forensic report, exhibit P-4"),
        )
        .await?;
    custody.submit_for_review(&clerk, &item.id).await?;
    custody.seal(&item.id, &judge, &judge_signer).await?;
    custody
        .annotate(&clerk, &item.id, "marked as exhibit P-4")
        .await?;
    for _ in 0..=settings.simulation.ledger_audit_failures {
        if custody.pending_audit_count() == 0 {
            break;
        }
        let sweep = custody.retry_ledger_audits().await;
        info!(recorded = sweep.recorded.len(), pending = sweep.still_pending.len(), "ledger audit sweep");
    }
    let sealed = custody.get(&item.id).await?;

    // Session end: every participant attests, the case becomes active.
    let session = tracker
        .register_session_end(&created.case_id, &ParticipantRole::ALL, CaseStatus::Active)
        .await?;
    for notice in dispatcher.delivered() {
        let request = store.get_attestation_request(&notice.request_id).await?;
        let signer = HmacSigner::new(
            notice.target_user_id.clone(),
            format!("{}-key", notice.target_user_id).into_bytes(),
        );
        let signature = signer
            .sign(&request.message()?)
            .await
            .context("attestation signer failed")?;
        let outcome = tracker
            .sign(&notice.request_id, &notice.target_user_id, &signature)
            .await?;
        info!(role = %notice.required_role, quorum = outcome.quorum_reached, "attestation collected");
    }
    let status = tracker.session_status(&session).await?;
    let case = store.get_case(&created.case_id).await?;

    Ok(LifecycleReport {
        external_case_id: created.external_case_id.clone(),
        create_sync_state: created.sync_state,
        verification_attempts: created.verification_attempts,
        skipped_reassign_state: skipped.sync_state,
        divergent_roles_after_reconcile: report.role_names(),
        verified_reassign_state: verified.sync_state,
        evidence_status: sealed.status,
        ledger_audit: sealed.ledger_audit,
        session_trigger: status.trigger,
        final_case_status: case.status,
        archived_sync_jobs: coordinator.journal().archived_for(&created.external_case_id).len(),
    })
}

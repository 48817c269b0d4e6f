// Integration tests for ledger-write-then-verify-then-commit case sync.
//
// The in-memory ledger and store stand in for the real adapters; a mockall
// ledger is used where a test must prove no ledger call was made at all.

use async_trait::async_trait;
use lexledger_core::memory::{InMemoryLedger, InMemoryRecordStore, LedgerCall, StaticDirectory};
use lexledger_core::{
    Assignment, AttestationRequest, AttestationSession, Candidate, Case, CaseCreateTx, CaseDraft,
    CaseId, CourtError, EvidenceId, EvidenceItem, EvidenceSealTx, ExternalCaseId, LedgerAddress,
    LedgerCase, LedgerClient, LedgerError, LedgerParticipants, LedgerResult, LedgerRole,
    ParticipantRole, RecordStore, RequestId, SessionId, StoreResult, SyncState,
    SyncTerminalState, TxHash, UserId,
};
use lexledger_sync::{CancellationToken, CaseSyncCoordinator, ReassignOptions, SyncPolicy};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Ledger {}

    #[async_trait]
    impl LedgerClient for Ledger {
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
}

fn addr(n: u8) -> LedgerAddress {
    LedgerAddress::new(format!("0x{:040x}", n))
}

fn full_participants() -> LedgerParticipants {
    LedgerParticipants {
        judge: addr(1),
        clerk: addr(9),
        prosecution: addr(2),
        defence: addr(3),
    }
}

fn draft() -> CaseDraft {
    CaseDraft {
        title: "State v. Mehta".into(),
        fir_ref: "FIR-2024-118".into(),
        judge: Candidate::new("judge-rao", Some(addr(1))),
        prosecution: Candidate::new("pp-iyer", Some(addr(2))),
        defence: Candidate::new("adv-khan", Some(addr(3))),
        metadata: BTreeMap::from([("court".to_string(), "sessions-7".to_string())]),
    }
}

struct Harness {
    ledger: Arc<InMemoryLedger>,
    store: Arc<InMemoryRecordStore>,
    coordinator: CaseSyncCoordinator,
}

fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedger::new(addr(9)));
    let store = Arc::new(InMemoryRecordStore::new());
    let coordinator =
        CaseSyncCoordinator::new(ledger.clone(), store.clone(), SyncPolicy::default()).unwrap();
    Harness {
        ledger,
        store,
        coordinator,
    }
}

#[tokio::test]
async fn test_missing_judge_address_makes_no_ledger_call() {
    let mut ledger = MockLedger::new();
    ledger.expect_submit_case_create().never();
    ledger.expect_read_case().never();
    ledger.expect_read_participants().never();
    let store = Arc::new(InMemoryRecordStore::new());
    let coordinator =
        CaseSyncCoordinator::new(Arc::new(ledger), store.clone(), SyncPolicy::default()).unwrap();

    let mut input = draft();
    input.judge = Candidate::new("judge-rao", None);
    let err = coordinator.create_case(input).await.unwrap_err();

    match err {
        CourtError::MissingLedgerIdentity { role, user } => {
            assert_eq!(role, ParticipantRole::Judge);
            assert_eq!(user, UserId::new("judge-rao"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.case_count(), 0);
}

#[tokio::test]
async fn test_zero_address_candidate_is_rejected_like_a_missing_one() {
    let h = harness();
    let mut input = draft();
    input.defence = Candidate::new("adv-khan", Some(LedgerAddress::zero()));

    let err = h.coordinator.create_case(input).await.unwrap_err();
    assert!(matches!(err, CourtError::MissingLedgerIdentity { role: ParticipantRole::Defence, .. }));
    assert_eq!(h.ledger.total_calls(), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_commits_on_third_verification_attempt() {
    let h = harness();
    h.ledger.set_visibility_lag(2);

    let outcome = h.coordinator.create_case(draft()).await.unwrap();

    assert_eq!(outcome.sync_state, SyncState::Verified);
    assert_eq!(outcome.verification_attempts, 3);
    assert_eq!(h.ledger.call_count(LedgerCall::SubmitCaseCreate), 1);
    assert_eq!(h.ledger.call_count(LedgerCall::ReadParticipants), 3);

    let submitted = h.ledger.submitted_creates();
    assert_eq!(submitted.len(), 1);
    let (submitted_hash, submitted_tx) = &submitted[0];

    let stored = h.store.get_case(&outcome.case_id).await.unwrap();
    assert_eq!(stored.tx_hash.as_ref(), Some(submitted_hash));
    assert_eq!(stored.external_case_id, submitted_tx.external_case_id);
    assert_eq!(stored.external_case_id, outcome.external_case_id);
    assert_eq!(stored.sync_state, SyncState::Verified);
    assert_eq!(stored.ledger_participants.clerk, addr(9));

    let jobs = h.coordinator.journal().archived_for(&outcome.external_case_id);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].terminal_state, Some(SyncTerminalState::Committed));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_scripted_zero_reads_then_valid_read() {
    let h = harness();
    h.ledger.script_participant_reads(vec![
        Ok(LedgerParticipants::unassigned()),
        Ok(LedgerParticipants::unassigned()),
    ]);

    let outcome = h.coordinator.create_case(draft()).await.unwrap();
    assert_eq!(outcome.verification_attempts, 3);
    assert_eq!(h.store.case_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_verification_never_commits() {
    let h = harness();
    h.ledger.set_visibility_lag(3);

    let err = h.coordinator.create_case(draft()).await.unwrap_err();

    match &err {
        CourtError::LedgerVerificationFailed { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.store.case_count(), 0);
    let archived = h.coordinator.journal().archived();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].terminal_state, Some(SyncTerminalState::FailedUnsynced));
}

#[tokio::test(start_paused = true)]
async fn test_verification_waits_between_attempts() {
    let h = harness();
    h.ledger.set_visibility_lag(2);
    let started = tokio::time::Instant::now();

    h.coordinator.create_case(draft()).await.unwrap();

    // Two pauses between three reads, none before the first.
    assert_eq!(started.elapsed(), h.coordinator.policy().verify_delay() * 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_submit_retry_reuses_external_id() {
    let seen: Arc<Mutex<Vec<ExternalCaseId>>> = Arc::new(Mutex::new(Vec::new()));
    let registered = Arc::new(AtomicBool::new(false));
    let mut ledger = MockLedger::new();
    let recorder = seen.clone();
    let landed = registered.clone();
    let mut calls = 0;
    ledger
        .expect_submit_case_create()
        .times(2)
        .returning(move |tx| {
            recorder.lock().push(tx.external_case_id.clone());
            calls += 1;
            if calls == 1 {
                Err(LedgerError::Network("connection reset".into()))
            } else {
                landed.store(true, Ordering::SeqCst);
                Ok(TxHash::new("0xabc"))
            }
        });
    let visible = registered.clone();
    ledger.expect_read_case().returning(move |id| {
        if !visible.load(Ordering::SeqCst) {
            return Err(LedgerError::CaseNotFound(id.to_string()));
        }
        Ok(LedgerCase {
            id: id.to_string(),
            title: "State v. Mehta".into(),
            status: "filed".into(),
        })
    });
    ledger.expect_read_participants().returning(|_| Ok(full_participants()));
    let store = Arc::new(InMemoryRecordStore::new());
    let coordinator =
        CaseSyncCoordinator::new(Arc::new(ledger), store.clone(), SyncPolicy::default()).unwrap();

    let outcome = coordinator.create_case(draft()).await.unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0], outcome.external_case_id);
    assert_eq!(outcome.tx_hash, Some(TxHash::new("0xabc")));
}

/// Registers the case at once but holds the receipt back, like a node that
/// includes the transaction long before the client hears about it.
struct SlowReceiptLedger {
    inner: InMemoryLedger,
    receipt_delay: Duration,
}

#[async_trait]
impl LedgerClient for SlowReceiptLedger {
    async fn submit_case_create(&self, tx: CaseCreateTx) -> LedgerResult<TxHash> {
        let tx_hash = self.inner.submit_case_create(tx).await?;
        tokio::time::sleep(self.receipt_delay).await;
        Ok(tx_hash)
    }
    async fn submit_reassign(
        &self,
        id: &ExternalCaseId,
        role: LedgerRole,
        address: &LedgerAddress,
    ) -> LedgerResult<TxHash> {
        self.inner.submit_reassign(id, role, address).await
    }
    async fn read_case(&self, id: &ExternalCaseId) -> LedgerResult<LedgerCase> {
        self.inner.read_case(id).await
    }
    async fn read_participants(&self, id: &ExternalCaseId) -> LedgerResult<LedgerParticipants> {
        self.inner.read_participants(id).await
    }
    async fn record_evidence_seal(&self, tx: EvidenceSealTx) -> LedgerResult<TxHash> {
        self.inner.record_evidence_seal(tx).await
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_timed_out_create_that_landed_is_adopted_not_rebroadcast() {
    let ledger = Arc::new(SlowReceiptLedger {
        inner: InMemoryLedger::new(addr(9)),
        receipt_delay: Duration::from_secs(120),
    });
    let store = Arc::new(InMemoryRecordStore::new());
    let coordinator =
        CaseSyncCoordinator::new(ledger.clone(), store.clone(), SyncPolicy::default()).unwrap();

    let outcome = coordinator.create_case(draft()).await.unwrap();

    assert_eq!(outcome.sync_state, SyncState::Verified);
    assert_eq!(outcome.tx_hash, None);
    assert_eq!(ledger.inner.call_count(LedgerCall::SubmitCaseCreate), 1);
    let submitted = ledger.inner.submitted_creates();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1.external_case_id, outcome.external_case_id);

    assert_eq!(store.case_count(), 1);
    let stored = store.get_case(&outcome.case_id).await.unwrap();
    assert_eq!(stored.external_case_id, outcome.external_case_id);
    assert_eq!(stored.sync_state, SyncState::Verified);

    let jobs = coordinator.journal().archived_for(&outcome.external_case_id);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].terminal_state, Some(SyncTerminalState::Committed));
}

#[tokio::test(start_paused = true)]
async fn test_rebroadcast_refused_as_registered_counts_as_landed() {
    let mut ledger = MockLedger::new();
    let mut submits = 0;
    ledger
        .expect_submit_case_create()
        .times(2)
        .returning(move |tx| {
            submits += 1;
            if submits == 1 {
                Err(LedgerError::Timeout(Duration::from_secs(30)))
            } else {
                Err(LedgerError::AlreadyRegistered(tx.external_case_id.to_string()))
            }
        });
    // The pre-rebroadcast read is lost; later reads see the case.
    let mut reads = 0;
    ledger.expect_read_case().returning(move |id| {
        reads += 1;
        if reads == 1 {
            return Err(LedgerError::Network("read replica down".into()));
        }
        Ok(LedgerCase {
            id: id.to_string(),
            title: "State v. Mehta".into(),
            status: "filed".into(),
        })
    });
    ledger.expect_read_participants().returning(|_| Ok(full_participants()));
    let store = Arc::new(InMemoryRecordStore::new());
    let coordinator =
        CaseSyncCoordinator::new(Arc::new(ledger), store.clone(), SyncPolicy::default()).unwrap();

    let outcome = coordinator.create_case(draft()).await.unwrap();

    assert_eq!(outcome.sync_state, SyncState::Verified);
    assert_eq!(outcome.tx_hash, None);
    assert_eq!(store.case_count(), 1);
}

#[tokio::test]
async fn test_insufficient_funds_is_not_retried() {
    let h = harness();
    h.ledger.fail_next_submits(vec![LedgerError::InsufficientFunds]);

    let err = h.coordinator.create_case(draft()).await.unwrap_err();
    assert!(matches!(err, CourtError::InsufficientFunds));
    assert_eq!(h.ledger.call_count(LedgerCall::SubmitCaseCreate), 1);
    assert_eq!(h.store.case_count(), 0);
}

#[tokio::test]
async fn test_cancelled_create_never_reaches_ledger() {
    let h = harness();
    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .coordinator
        .create_case_with_cancel(draft(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, CourtError::Cancelled));
    assert_eq!(h.ledger.total_calls(), 0);
}

#[tokio::test]
async fn test_commit_failure_is_queued_and_retried() {
    let h = harness();
    h.store.fail_next_case_inserts(1);

    let outcome = h.coordinator.create_case(draft()).await.unwrap();
    assert_eq!(outcome.sync_state, SyncState::Pending);
    assert_eq!(h.coordinator.pending_commit_count(), 1);
    assert!(h
        .coordinator
        .pending_commit_error(&outcome.external_case_id)
        .is_some());
    assert!(h.store.get_case(&outcome.case_id).await.is_err());

    let sweep = h.coordinator.retry_pending_commits().await;
    assert_eq!(sweep.committed, vec![outcome.external_case_id.clone()]);
    assert!(sweep.still_pending.is_empty());
    assert_eq!(h.coordinator.pending_commit_count(), 0);

    let stored = h.store.get_case(&outcome.case_id).await.unwrap();
    assert_eq!(stored.sync_state, SyncState::Verified);
    assert_eq!(stored.external_case_id, outcome.external_case_id);
    // The ledger was written once; recovery never re-submits.
    assert_eq!(h.ledger.call_count(LedgerCall::SubmitCaseCreate), 1);
}

#[tokio::test]
async fn test_rebuild_commits_queued_snapshot() {
    let h = harness();
    h.store.fail_next_case_inserts(1);
    let outcome = h.coordinator.create_case(draft()).await.unwrap();

    let rebuilt = h
        .coordinator
        .rebuild_from_ledger(&outcome.external_case_id)
        .await
        .unwrap();
    assert_eq!(rebuilt.id, outcome.case_id);
    assert_eq!(h.coordinator.pending_commit_count(), 0);
}

#[tokio::test]
async fn test_rebuild_from_ledger_uses_directory() {
    let h = harness();
    let directory = Arc::new(StaticDirectory::new());
    directory.register(&addr(1), UserId::new("judge-rao"));
    directory.register(&addr(2), UserId::new("pp-iyer"));
    directory.register(&addr(3), UserId::new("adv-khan"));
    let coordinator = CaseSyncCoordinator::new(h.ledger.clone(), h.store.clone(), SyncPolicy::default())
        .unwrap()
        .with_directory(directory);

    // A case that reached the ledger through another client.
    let external_case_id = ExternalCaseId::mint();
    h.ledger
        .submit_case_create(CaseCreateTx {
            external_case_id: external_case_id.clone(),
            title: "State v. Mehta".into(),
            fir_ref: "FIR-2024-118".into(),
            prosecution: addr(2),
            defence: addr(3),
            judge: addr(1),
            metadata: BTreeMap::new(),
        })
        .await
        .unwrap();

    let rebuilt = coordinator.rebuild_from_ledger(&external_case_id).await.unwrap();
    assert_eq!(rebuilt.external_case_id, external_case_id);
    assert_eq!(rebuilt.participants.judge.user_id, UserId::new("judge-rao"));
    assert_eq!(rebuilt.sync_state, SyncState::Verified);

    let again = coordinator.rebuild_from_ledger(&external_case_id).await.unwrap();
    assert_eq!(again.id, rebuilt.id);
    assert_eq!(h.store.case_count(), 1);
}

#[tokio::test]
async fn test_reassign_verified() {
    let h = harness();
    let created = h.coordinator.create_case(draft()).await.unwrap();

    let outcome = h
        .coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.sync_state, SyncState::Verified);
    assert!(outcome.tx_hash.is_some());
    assert!(outcome.divergence.is_none());
    let stored = h.store.get_case(&created.case_id).await.unwrap();
    assert_eq!(stored.participants.judge.user_id, UserId::new("judge-sen"));
    assert_eq!(stored.ledger_participants.judge, addr(4));
    assert_eq!(stored.tx_hash, outcome.tx_hash);
}

#[tokio::test]
async fn test_skipped_reassign_is_recorded_as_divergent() {
    let h = harness();
    let created = h.coordinator.create_case(draft()).await.unwrap();

    let outcome = h
        .coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Defence,
            Candidate::new("adv-pillai", Some(addr(5))),
            ReassignOptions { skip_ledger: true },
        )
        .await
        .unwrap();

    assert!(outcome.is_divergent());
    let report = outcome.divergence.expect("divergence report");
    assert_eq!(report.role_names(), vec![ParticipantRole::Defence]);
    assert_eq!(h.ledger.call_count(LedgerCall::SubmitReassign), 0);

    let view = h.coordinator.case_view(&created.case_id).await.unwrap();
    assert_eq!(view.case.participants.defence.user_id, UserId::new("adv-pillai"));
    assert_eq!(view.sync_state, SyncState::Divergent);
    assert!(view.divergence.is_some());

    let gated = h.coordinator.require_verified(&created.case_id).await.unwrap_err();
    assert!(matches!(gated, CourtError::DivergentState { .. }));
}

#[tokio::test]
async fn test_role_authorization_failure_is_recorded_divergent() {
    let h = harness();
    let created = h.coordinator.create_case(draft()).await.unwrap();
    h.ledger
        .fail_next_reassigns(vec![LedgerError::RoleAuthorization("not an enrolled advocate".into())]);

    let outcome = h
        .coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Prosecution,
            Candidate::new("pp-das", Some(addr(6))),
            ReassignOptions::default(),
        )
        .await
        .unwrap();

    assert!(outcome.is_divergent());
    assert!(matches!(outcome.ledger_error, Some(CourtError::RoleAuthorization(_))));
    assert_eq!(h.ledger.call_count(LedgerCall::SubmitReassign), 1);
}

#[tokio::test]
async fn test_user_rejected_reassign_writes_nothing() {
    let h = harness();
    let created = h.coordinator.create_case(draft()).await.unwrap();
    let before = h.store.get_case(&created.case_id).await.unwrap();
    h.ledger.fail_next_reassigns(vec![LedgerError::UserRejected]);

    let err = h
        .coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CourtError::UserRejected));
    let after = h.store.get_case(&created.case_id).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_reconcile_clears_divergence_once_ledger_catches_up() {
    let h = harness();
    let created = h.coordinator.create_case(draft()).await.unwrap();
    h.coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions { skip_ledger: true },
        )
        .await
        .unwrap();

    let still = h.coordinator.reconcile(&created.case_id).await.unwrap();
    assert_eq!(still.role_names(), vec![ParticipantRole::Judge]);

    h.ledger
        .force_participant(&created.external_case_id, LedgerRole::Judge, addr(4));
    let report = h.coordinator.reconcile(&created.case_id).await.unwrap();
    assert!(report.is_empty());

    let case = h.coordinator.require_verified(&created.case_id).await.unwrap();
    assert_eq!(case.participants.judge.user_id, UserId::new("judge-sen"));
}

#[tokio::test]
async fn test_cancelled_reassign_leaves_row_untouched() {
    let h = harness();
    let created = h.coordinator.create_case(draft()).await.unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .coordinator
        .reassign_participant_with_cancel(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions::default(),
            &token,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CourtError::Cancelled));
    assert_eq!(h.ledger.call_count(LedgerCall::SubmitReassign), 0);
    let stored = h.store.get_case(&created.case_id).await.unwrap();
    assert_eq!(stored.participants.judge.user_id, UserId::new("judge-rao"));
}

/// Lands a competing edit of one role just before each queued case update,
/// as another editor racing the coordinator would.
struct InterleavingStore {
    inner: InMemoryRecordStore,
    rival_edits: Mutex<VecDeque<(ParticipantRole, Assignment)>>,
}

impl InterleavingStore {
    fn new() -> Self {
        InterleavingStore {
            inner: InMemoryRecordStore::new(),
            rival_edits: Mutex::new(VecDeque::new()),
        }
    }

    fn race_next_updates(&self, edits: Vec<(ParticipantRole, Assignment)>) {
        self.rival_edits.lock().extend(edits);
    }
}

#[async_trait]
impl RecordStore for InterleavingStore {
    async fn insert_case(&self, case: Case) -> StoreResult<Case> {
        self.inner.insert_case(case).await
    }
    async fn get_case(&self, id: &CaseId) -> StoreResult<Case> {
        self.inner.get_case(id).await
    }
    async fn find_case_by_external_id(&self, id: &ExternalCaseId) -> StoreResult<Option<Case>> {
        self.inner.find_case_by_external_id(id).await
    }
    async fn update_case(&self, case: Case, expected_version: u64) -> StoreResult<Case> {
        let rival = self.rival_edits.lock().pop_front();
        if let Some((role, assignment)) = rival {
            let mut theirs = self.inner.get_case(&case.id).await?;
            let version = theirs.version;
            theirs.participants.set(role, assignment);
            self.inner.update_case(theirs, version).await?;
        }
        self.inner.update_case(case, expected_version).await
    }
    async fn insert_evidence(&self, item: EvidenceItem) -> StoreResult<EvidenceItem> {
        self.inner.insert_evidence(item).await
    }
    async fn get_evidence(&self, id: &EvidenceId) -> StoreResult<EvidenceItem> {
        self.inner.get_evidence(id).await
    }
    async fn update_evidence(&self, item: EvidenceItem, expected_version: u64) -> StoreResult<EvidenceItem> {
        self.inner.update_evidence(item, expected_version).await
    }
    async fn list_evidence_for_case(&self, case_id: &CaseId) -> StoreResult<Vec<EvidenceItem>> {
        self.inner.list_evidence_for_case(case_id).await
    }
    async fn insert_session(&self, session: AttestationSession) -> StoreResult<AttestationSession> {
        self.inner.insert_session(session).await
    }
    async fn get_session(&self, id: &SessionId) -> StoreResult<AttestationSession> {
        self.inner.get_session(id).await
    }
    async fn update_session(
        &self,
        session: AttestationSession,
        expected_version: u64,
    ) -> StoreResult<AttestationSession> {
        self.inner.update_session(session, expected_version).await
    }
    async fn insert_attestation_request(&self, request: AttestationRequest) -> StoreResult<AttestationRequest> {
        self.inner.insert_attestation_request(request).await
    }
    async fn get_attestation_request(&self, id: &RequestId) -> StoreResult<AttestationRequest> {
        self.inner.get_attestation_request(id).await
    }
    async fn update_attestation_request(
        &self,
        request: AttestationRequest,
        expected_version: u64,
    ) -> StoreResult<AttestationRequest> {
        self.inner.update_attestation_request(request, expected_version).await
    }
    async fn list_requests_for_session(&self, session_id: &SessionId) -> StoreResult<Vec<AttestationRequest>> {
        self.inner.list_requests_for_session(session_id).await
    }
}

fn racing_harness() -> (Arc<InMemoryLedger>, Arc<InterleavingStore>, CaseSyncCoordinator) {
    let ledger = Arc::new(InMemoryLedger::new(addr(9)));
    let store = Arc::new(InterleavingStore::new());
    let coordinator =
        CaseSyncCoordinator::new(ledger.clone(), store.clone(), SyncPolicy::default()).unwrap();
    (ledger, store, coordinator)
}

fn assignment(user: &str, n: u8) -> Assignment {
    Assignment {
        user_id: user.into(),
        ledger_address: addr(n),
    }
}

#[tokio::test]
async fn test_same_role_reassigned_concurrently_is_a_stale_write() {
    let (_ledger, store, coordinator) = racing_harness();
    let created = coordinator.create_case(draft()).await.unwrap();
    store.race_next_updates(vec![(ParticipantRole::Judge, assignment("judge-das", 7))]);

    let err = coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CourtError::StaleWrite(_)), "{err:?}");
    let stored = store.get_case(&created.case_id).await.unwrap();
    assert_eq!(stored.participants.judge.user_id, UserId::new("judge-das"));
    let jobs = coordinator.journal().archived_for(&created.external_case_id);
    assert_eq!(jobs.last().unwrap().terminal_state, Some(SyncTerminalState::FailedUnsynced));
}

#[tokio::test]
async fn test_other_role_changed_concurrently_is_reapplied() {
    let (ledger, store, coordinator) = racing_harness();
    let created = coordinator.create_case(draft()).await.unwrap();
    let before = store.get_case(&created.case_id).await.unwrap();
    store.race_next_updates(vec![(ParticipantRole::Defence, assignment("adv-pillai", 5))]);

    let outcome = coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.role, ParticipantRole::Judge);
    assert_eq!(ledger.call_count(LedgerCall::SubmitReassign), 1);
    let stored = store.get_case(&created.case_id).await.unwrap();
    assert_eq!(stored.participants.judge.user_id, UserId::new("judge-sen"));
    assert_eq!(stored.ledger_participants.judge, addr(4));
    // The rival's edit survives the re-applied write.
    assert_eq!(stored.participants.defence.user_id, UserId::new("adv-pillai"));
    assert_eq!(stored.version, before.version + 2);
}

#[tokio::test]
async fn test_row_that_never_settles_gives_up_as_stale() {
    let (_ledger, store, coordinator) = racing_harness();
    let created = coordinator.create_case(draft()).await.unwrap();
    let retries = coordinator.policy().conflict_retries as usize;
    store.race_next_updates(
        (0..=retries)
            .map(|i| (ParticipantRole::Defence, assignment(&format!("adv-{i}"), 20 + i as u8)))
            .collect(),
    );

    let err = coordinator
        .reassign_participant(
            &created.case_id,
            ParticipantRole::Judge,
            Candidate::new("judge-sen", Some(addr(4))),
            ReassignOptions { skip_ledger: true },
        )
        .await
        .unwrap_err();

    match err {
        CourtError::StaleWrite(msg) => assert!(msg.contains("kept changing"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
    let stored = store.get_case(&created.case_id).await.unwrap();
    assert_eq!(stored.participants.judge.user_id, UserId::new("judge-rao"));
}

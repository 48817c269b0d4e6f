// Attestation sessions end to end against the in-memory store.

use async_trait::async_trait;
use chrono::Utc;
use lexledger_attest::{AdvanceCaseStatus, AttestationQuorumTracker, QuorumAction, QuorumPolicy};
use lexledger_core::memory::{HmacSigner, InMemoryRecordStore, RecordingDispatcher};
use lexledger_core::{
    Assignment, AttestationRequest, AttestationSession, Case, CaseId, CaseStatus, CourtError,
    CourtResult, EvidenceId, EvidenceItem, ExternalCaseId, LedgerAddress, LedgerParticipants,
    ParticipantRole, Participants, RecordStore, RequestId, SessionId, Signer, StoreError,
    StoreResult, SyncState, TriggerState, UserId,
};
use mockall::mock;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ALL_ROLES: [ParticipantRole; 3] = [
    ParticipantRole::Judge,
    ParticipantRole::Prosecution,
    ParticipantRole::Defence,
];

fn addr(n: u8) -> LedgerAddress {
    LedgerAddress::new(format!("0x{:040x}", n))
}

async fn seeded_case(store: &InMemoryRecordStore, status: CaseStatus) -> CaseId {
    let now = Utc::now();
    let case = Case {
        id: CaseId::generate(),
        external_case_id: ExternalCaseId::mint(),
        title: "State v. Mehta".into(),
        fir_ref: "FIR-2024-118".into(),
        status,
        participants: Participants {
            judge: Assignment { user_id: "judge-rao".into(), ledger_address: addr(1) },
            prosecution: Assignment { user_id: "pp-iyer".into(), ledger_address: addr(2) },
            defence: Assignment { user_id: "adv-khan".into(), ledger_address: addr(3) },
        },
        ledger_participants: LedgerParticipants {
            judge: addr(1),
            clerk: addr(9),
            prosecution: addr(2),
            defence: addr(3),
        },
        sync_state: SyncState::Verified,
        tx_hash: None,
        metadata: BTreeMap::new(),
        version: 0,
        created_at: now,
        updated_at: now,
    };
    store.insert_case(case).await.unwrap().id
}

fn user_for(role: ParticipantRole) -> UserId {
    match role {
        ParticipantRole::Judge => UserId::new("judge-rao"),
        ParticipantRole::Prosecution => UserId::new("pp-iyer"),
        ParticipantRole::Defence => UserId::new("adv-khan"),
    }
}

async fn request_for(
    store: &InMemoryRecordStore,
    session: &SessionId,
    role: ParticipantRole,
) -> AttestationRequest {
    store
        .list_requests_for_session(session)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.required_role == role)
        .expect("request for role")
}

async fn signature_for(request: &AttestationRequest) -> Vec<u8> {
    let signer = HmacSigner::new(request.target_user_id.clone(), request.target_user_id.as_str().as_bytes().to_vec());
    signer.sign(&request.message().unwrap()).await.unwrap()
}

/// Default action plus a count of successful applications.
struct CountingAction {
    inner: AdvanceCaseStatus,
    applied: AtomicUsize,
}

#[async_trait]
impl QuorumAction for CountingAction {
    async fn apply(&self, session: &AttestationSession) -> CourtResult<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.inner.apply(session).await?;
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

mock! {
    pub Action {}

    #[async_trait]
    impl QuorumAction for Action {
        async fn apply(&self, session: &AttestationSession) -> CourtResult<()>;
    }
}

struct Harness {
    store: Arc<InMemoryRecordStore>,
    dispatcher: Arc<RecordingDispatcher>,
    tracker: Arc<AttestationQuorumTracker>,
    case_id: CaseId,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryRecordStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let case_id = seeded_case(&store, CaseStatus::Hearing).await;
    let tracker = Arc::new(
        AttestationQuorumTracker::new(store.clone(), dispatcher.clone(), QuorumPolicy::default())
            .unwrap(),
    );
    Harness {
        store,
        dispatcher,
        tracker,
        case_id,
    }
}

impl Harness {
    async fn sign_role(&self, session: &SessionId, role: ParticipantRole) -> lexledger_attest::SignOutcome {
        let request = request_for(&self.store, session, role).await;
        let signature = signature_for(&request).await;
        self.tracker
            .sign(&request.id, &user_for(role), &signature)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_one_request_per_distinct_role() {
    let h = harness().await;
    let session = h
        .tracker
        .register_session_end(
            &h.case_id,
            &[
                ParticipantRole::Judge,
                ParticipantRole::Prosecution,
                ParticipantRole::Judge,
                ParticipantRole::Defence,
            ],
            CaseStatus::VerdictPending,
        )
        .await
        .unwrap();

    let requests = h.store.list_requests_for_session(&session).await.unwrap();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(request.target_user_id, user_for(request.required_role));
        assert_eq!(request.session_id, session);
    }

    let notices = h.dispatcher.delivered();
    assert_eq!(notices.len(), 3);
    assert!(notices.iter().all(|n| n.session_id == session));
}

#[tokio::test]
async fn test_empty_role_set_is_rejected() {
    let h = harness().await;
    let err = h
        .tracker
        .register_session_end(&h.case_id, &[], CaseStatus::VerdictPending)
        .await
        .unwrap_err();
    assert!(matches!(err, CourtError::InvalidInput(_)));
}

#[tokio::test]
async fn test_unreachable_target_status_is_rejected() {
    let h = harness().await;
    let err = h
        .tracker
        .register_session_end(&h.case_id, &ALL_ROLES, CaseStatus::Closed)
        .await
        .unwrap_err();
    assert!(matches!(err, CourtError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_wrong_signer_is_unauthorized() {
    let h = harness().await;
    let session = h
        .tracker
        .register_session_end(&h.case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap();
    let judge_request = request_for(&h.store, &session, ParticipantRole::Judge).await;

    let err = h
        .tracker
        .sign(&judge_request.id, &UserId::new("adv-khan"), b"forged")
        .await
        .unwrap_err();

    assert!(matches!(err, CourtError::Unauthorized { .. }));
    let unchanged = h.store.get_attestation_request(&judge_request.id).await.unwrap();
    assert!(!unchanged.is_signed());
}

#[tokio::test]
async fn test_resigning_returns_existing_signature() {
    let h = harness().await;
    let session = h
        .tracker
        .register_session_end(&h.case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap();

    let first = h.sign_role(&session, ParticipantRole::Judge).await;
    assert!(!first.already_signed);
    assert!(!first.quorum_reached);

    let request = request_for(&h.store, &session, ParticipantRole::Judge).await;
    let again = h
        .tracker
        .sign(&request.id, &UserId::new("judge-rao"), b"different bytes")
        .await
        .unwrap();
    assert!(again.already_signed);
    assert_eq!(again.signature, first.signature);
    assert_eq!(request.version, 2);
}

#[tokio::test]
async fn test_last_signature_advances_case() {
    let h = harness().await;
    let session = h
        .tracker
        .register_session_end(&h.case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap();

    assert!(!h.sign_role(&session, ParticipantRole::Defence).await.triggered);
    assert!(!h.sign_role(&session, ParticipantRole::Judge).await.triggered);
    let last = h.sign_role(&session, ParticipantRole::Prosecution).await;
    assert!(last.quorum_reached);
    assert!(last.triggered);

    let case = h.store.get_case(&h.case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::VerdictPending);

    let status = h.tracker.session_status(&session).await.unwrap();
    assert!(status.quorum_reached);
    assert!(status.outstanding_roles.is_empty());
    assert!(matches!(status.trigger, TriggerState::Applied { .. }));

    // A late duplicate confirmation changes nothing.
    let replay = h.sign_role(&session, ParticipantRole::Judge).await;
    assert!(replay.already_signed);
    assert!(!replay.triggered);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_racing_final_signatures_trigger_once() {
    let store = Arc::new(InMemoryRecordStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let case_id = seeded_case(&store, CaseStatus::Hearing).await;
    let action = Arc::new(CountingAction {
        inner: AdvanceCaseStatus::new(store.clone(), 3),
        applied: AtomicUsize::new(0),
    });
    let tracker = Arc::new(
        AttestationQuorumTracker::with_action(
            store.clone(),
            dispatcher,
            action.clone(),
            QuorumPolicy::default(),
        )
        .unwrap(),
    );
    let session = tracker
        .register_session_end(&case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap();
    let judge = request_for(&store, &session, ParticipantRole::Judge).await;
    tracker
        .sign(&judge.id, &user_for(ParticipantRole::Judge), &signature_for(&judge).await)
        .await
        .unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut handles = Vec::new();
    for role in [ParticipantRole::Prosecution, ParticipantRole::Defence] {
        let request = request_for(&store, &session, role).await;
        let signature = signature_for(&request).await;
        let tracker = tracker.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            tracker.sign(&request.id, &user_for(role), &signature).await
        }));
    }
    let mut triggered = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().triggered {
            triggered += 1;
        }
    }

    assert_eq!(triggered, 1);
    assert_eq!(action.applied.load(Ordering::SeqCst), 1);
    let case = store.get_case(&case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::VerdictPending);
    // Inserted at version 1, advanced exactly once.
    assert_eq!(case.version, 2);
}

#[tokio::test]
async fn test_failed_trigger_keeps_signatures_and_retries() {
    let store = Arc::new(InMemoryRecordStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let case_id = seeded_case(&store, CaseStatus::Hearing).await;

    let mut action = MockAction::new();
    let mut calls = 0;
    action.expect_apply().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Err(CourtError::Store(StoreError::Unavailable("case table locked".into())))
        } else {
            Ok(())
        }
    });
    let tracker = AttestationQuorumTracker::with_action(
        store.clone(),
        dispatcher,
        Arc::new(action),
        QuorumPolicy::default(),
    )
    .unwrap();
    let session = tracker
        .register_session_end(&case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap();

    let mut last = None;
    for role in ALL_ROLES {
        let request = request_for(&store, &session, role).await;
        let signature = signature_for(&request).await;
        last = Some(tracker.sign(&request.id, &user_for(role), &signature).await.unwrap());
    }
    let last = last.unwrap();
    assert!(last.quorum_reached);
    assert!(!last.triggered);

    let status = tracker.session_status(&session).await.unwrap();
    assert_eq!(status.signed_roles.len(), 3);
    assert!(matches!(status.trigger, TriggerState::Failed { attempts: 1, .. }));

    let sweep = tracker.retry_pending_triggers().await;
    assert_eq!(sweep.applied, vec![session.clone()]);
    let status = tracker.session_status(&session).await.unwrap();
    assert!(matches!(status.trigger, TriggerState::Applied { .. }));
    assert_eq!(status.signed_roles.len(), 3);

    // Nothing left to retry.
    assert!(tracker.retry_pending_triggers().await.applied.is_empty());
}

#[tokio::test]
async fn test_undelivered_notices_are_redispatched() {
    let h = harness().await;
    h.dispatcher.fail_next(2);
    let session = h
        .tracker
        .register_session_end(&h.case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap();
    assert_eq!(h.dispatcher.delivered().len(), 1);

    h.sign_role(&session, ParticipantRole::Judge).await;
    let resent = h.tracker.redispatch_unsigned(&session).await.unwrap();
    assert_eq!(resent, 2);
    let roles: Vec<ParticipantRole> = h
        .dispatcher
        .delivered()
        .iter()
        .skip(1)
        .map(|n| n.required_role)
        .collect();
    assert!(!roles.contains(&ParticipantRole::Judge));
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let h = harness().await;
    let err = h
        .tracker
        .sign(&RequestId::new("missing"), &UserId::new("judge-rao"), b"sig")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Delegates to the in-memory store but refuses the n-th request insert and,
/// optionally, every session update.
struct PartialRequestStore {
    inner: InMemoryRecordStore,
    fail_request_insert: usize,
    request_inserts: AtomicUsize,
    refuse_session_updates: bool,
    opened: Mutex<Option<SessionId>>,
}

impl PartialRequestStore {
    fn new(fail_request_insert: usize, refuse_session_updates: bool) -> Self {
        PartialRequestStore {
            inner: InMemoryRecordStore::new(),
            fail_request_insert,
            request_inserts: AtomicUsize::new(0),
            refuse_session_updates,
            opened: Mutex::new(None),
        }
    }

    fn opened(&self) -> SessionId {
        self.opened.lock().unwrap().clone().expect("a session was inserted")
    }
}

#[async_trait]
impl RecordStore for PartialRequestStore {
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
        *self.opened.lock().unwrap() = Some(session.id.clone());
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
        if self.refuse_session_updates {
            return Err(StoreError::Unavailable("session table locked".into()));
        }
        self.inner.update_session(session, expected_version).await
    }
    async fn insert_attestation_request(&self, request: AttestationRequest) -> StoreResult<AttestationRequest> {
        let n = self.request_inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_request_insert {
            return Err(StoreError::Unavailable("request insert dropped".into()));
        }
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

async fn partially_registered(
    refuse_session_updates: bool,
) -> (Arc<PartialRequestStore>, AttestationQuorumTracker, CaseId, SessionId) {
    let store = Arc::new(PartialRequestStore::new(2, refuse_session_updates));
    let case_id = seeded_case(&store.inner, CaseStatus::Hearing).await;
    let tracker = AttestationQuorumTracker::new(
        store.clone(),
        Arc::new(RecordingDispatcher::new()),
        QuorumPolicy::default(),
    )
    .unwrap();
    let err = tracker
        .register_session_end(&case_id, &ALL_ROLES, CaseStatus::VerdictPending)
        .await
        .unwrap_err();
    assert!(matches!(err, CourtError::Store(StoreError::Unavailable(_))), "{err:?}");
    let session = store.opened();
    (store, tracker, case_id, session)
}

#[tokio::test]
async fn test_partially_registered_session_is_abandoned() {
    let (store, tracker, case_id, session) = partially_registered(false).await;

    // Only the judge's request made it in.
    let stored = store.list_requests_for_session(&session).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].required_role, ParticipantRole::Judge);

    let status = tracker.session_status(&session).await.unwrap();
    assert!(matches!(status.trigger, TriggerState::Abandoned { .. }));
    assert_eq!(status.outstanding_roles, ALL_ROLES.to_vec());
    assert!(!status.quorum_reached);

    let signature = signature_for(&stored[0]).await;
    let err = tracker
        .sign(&stored[0].id, &user_for(ParticipantRole::Judge), &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, CourtError::SessionAbandoned(ref id) if *id == session));
    assert!(matches!(
        tracker.redispatch_unsigned(&session).await,
        Err(CourtError::SessionAbandoned(_))
    ));
    assert!(!tracker.retry_session_trigger(&session).await.unwrap());

    let case = store.get_case(&case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Hearing);
}

#[tokio::test]
async fn test_single_signature_on_unmarked_partial_session_has_no_quorum() {
    // The abandonment mark is lost as well; the required roles still gate it.
    let (store, tracker, case_id, session) = partially_registered(true).await;
    let stored = store.list_requests_for_session(&session).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(matches!(
        store.get_session(&session).await.unwrap().trigger,
        TriggerState::Pending
    ));

    let signature = signature_for(&stored[0]).await;
    let outcome = tracker
        .sign(&stored[0].id, &user_for(ParticipantRole::Judge), &signature)
        .await
        .unwrap();
    assert!(!outcome.quorum_reached);
    assert!(!outcome.triggered);

    let status = tracker.session_status(&session).await.unwrap();
    assert_eq!(status.signed_roles, vec![ParticipantRole::Judge]);
    assert_eq!(
        status.outstanding_roles,
        vec![ParticipantRole::Prosecution, ParticipantRole::Defence]
    );
    assert_eq!(store.get_case(&case_id).await.unwrap().status, CaseStatus::Hearing);
}

proptest! {
    #[test]
    fn quorum_only_after_every_role_signs(order in Just(ALL_ROLES.to_vec()).prop_shuffle()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = harness().await;
            let session = h
                .tracker
                .register_session_end(&h.case_id, &ALL_ROLES, CaseStatus::VerdictPending)
                .await
                .unwrap();
            let last = order.len() - 1;
            for (i, role) in order.iter().enumerate() {
                let outcome = h.sign_role(&session, *role).await;
                assert_eq!(outcome.quorum_reached, i == last);
                assert_eq!(outcome.triggered, i == last);
            }
        });
    }
}

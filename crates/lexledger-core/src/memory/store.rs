// DashMap-backed record store with version-checked updates.
//
// Every update holds the shard lock of the row for the compare-and-replace,
// so two writers holding the same version cannot both succeed.

use crate::attestation::{AttestationRequest, AttestationSession};
use crate::case::{Case, ParticipantRole};
use crate::errors::{StoreError, StoreResult};
use crate::evidence::EvidenceItem;
use crate::ids::{CaseId, EvidenceId, ExternalCaseId, RequestId, SessionId};
use crate::store::RecordStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

trait Versioned: Clone {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),*) => {
        $(impl Versioned for $ty {
            fn version(&self) -> u64 {
                self.version
            }
            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        })*
    };
}

versioned!(Case, EvidenceItem, AttestationSession, AttestationRequest);

fn insert_new<K, V>(map: &DashMap<K, V>, key: K, kind: &'static str, mut value: V) -> StoreResult<V>
where
    K: Eq + Hash + ToString,
    V: Versioned,
{
    match map.entry(key) {
        Entry::Occupied(entry) => Err(StoreError::Duplicate {
            kind,
            id: entry.key().to_string(),
        }),
        Entry::Vacant(entry) => {
            value.set_version(1);
            entry.insert(value.clone());
            Ok(value)
        }
    }
}

fn replace_versioned<K, V>(
    map: &DashMap<K, V>,
    key: &K,
    kind: &'static str,
    mut value: V,
    expected_version: u64,
) -> StoreResult<V>
where
    K: Eq + Hash + ToString,
    V: Versioned,
{
    let mut row = map.get_mut(key).ok_or_else(|| StoreError::NotFound {
        kind,
        id: key.to_string(),
    })?;
    if row.version() != expected_version {
        return Err(StoreError::VersionConflict {
            kind,
            id: key.to_string(),
            expected: expected_version,
            found: row.version(),
        });
    }
    value.set_version(expected_version + 1);
    *row = value.clone();
    Ok(value)
}

fn fetch<K, V>(map: &DashMap<K, V>, key: &K, kind: &'static str) -> StoreResult<V>
where
    K: Eq + Hash + ToString,
    V: Clone,
{
    map.get(key)
        .map(|row| row.value().clone())
        .ok_or_else(|| StoreError::NotFound {
            kind,
            id: key.to_string(),
        })
}

/// Decrement a failure budget; true if a failure should be injected.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    cases: DashMap<CaseId, Case>,
    external_index: DashMap<ExternalCaseId, CaseId>,
    evidence: DashMap<EvidenceId, EvidenceItem>,
    sessions: DashMap<SessionId, AttestationSession>,
    requests: DashMap<RequestId, AttestationRequest>,
    session_roles: DashMap<(SessionId, ParticipantRole), RequestId>,
    case_insert_failures: AtomicUsize,
    case_update_failures: AtomicUsize,
    evidence_update_failures: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` case inserts fail with `Unavailable`.
    pub fn fail_next_case_inserts(&self, n: usize) {
        self.case_insert_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` case updates fail with `Unavailable`.
    pub fn fail_next_case_updates(&self, n: usize) {
        self.case_update_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` evidence updates fail with `Unavailable`.
    pub fn fail_next_evidence_updates(&self, n: usize) {
        self.evidence_update_failures.store(n, Ordering::SeqCst);
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_case(&self, case: Case) -> StoreResult<Case> {
        if take_failure(&self.case_insert_failures) {
            return Err(StoreError::Unavailable("injected case insert failure".into()));
        }
        match self.external_index.entry(case.external_case_id.clone()) {
            Entry::Occupied(entry) => {
                return Err(StoreError::Duplicate {
                    kind: "case",
                    id: entry.key().to_string(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(case.id.clone());
            }
        }
        let external_case_id = case.external_case_id.clone();
        let inserted = insert_new(&self.cases, case.id.clone(), "case", case);
        if inserted.is_err() {
            self.external_index.remove(&external_case_id);
        }
        if let Ok(case) = &inserted {
            debug!("case {} inserted ({})", case.id, case.external_case_id);
        }
        inserted
    }

    async fn get_case(&self, id: &CaseId) -> StoreResult<Case> {
        fetch(&self.cases, id, "case")
    }

    async fn find_case_by_external_id(&self, id: &ExternalCaseId) -> StoreResult<Option<Case>> {
        let case_id = match self.external_index.get(id) {
            Some(case_id) => case_id.value().clone(),
            None => return Ok(None),
        };
        Ok(self.cases.get(&case_id).map(|row| row.value().clone()))
    }

    async fn update_case(&self, case: Case, expected_version: u64) -> StoreResult<Case> {
        if take_failure(&self.case_update_failures) {
            return Err(StoreError::Unavailable("injected case update failure".into()));
        }
        if let Some(current) = self.cases.get(&case.id) {
            if current.external_case_id != case.external_case_id {
                return Err(StoreError::ImmutableField {
                    kind: "case",
                    id: case.id.to_string(),
                    field: "external_case_id",
                });
            }
        }
        let id = case.id.clone();
        replace_versioned(&self.cases, &id, "case", case, expected_version)
    }

    async fn insert_evidence(&self, item: EvidenceItem) -> StoreResult<EvidenceItem> {
        insert_new(&self.evidence, item.id.clone(), "evidence", item)
    }

    async fn get_evidence(&self, id: &EvidenceId) -> StoreResult<EvidenceItem> {
        fetch(&self.evidence, id, "evidence")
    }

    async fn update_evidence(
        &self,
        item: EvidenceItem,
        expected_version: u64,
    ) -> StoreResult<EvidenceItem> {
        if take_failure(&self.evidence_update_failures) {
            return Err(StoreError::Unavailable("injected evidence update failure".into()));
        }
        if let Some(current) = self.evidence.get(&item.id) {
            if current.is_immutable() {
                let sealed_field = if current.status != item.status {
                    Some("status")
                } else if current.seal_signature != item.seal_signature {
                    Some("seal_signature")
                } else if current.file != item.file {
                    Some("file")
                } else {
                    None
                };
                if let Some(field) = sealed_field {
                    return Err(StoreError::ImmutableField {
                        kind: "evidence",
                        id: item.id.to_string(),
                        field,
                    });
                }
            }
        }
        let id = item.id.clone();
        replace_versioned(&self.evidence, &id, "evidence", item, expected_version)
    }

    async fn list_evidence_for_case(&self, case_id: &CaseId) -> StoreResult<Vec<EvidenceItem>> {
        let mut items: Vec<EvidenceItem> = self
            .evidence
            .iter()
            .filter(|row| &row.case_id == case_id)
            .map(|row| row.value().clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn insert_session(&self, session: AttestationSession) -> StoreResult<AttestationSession> {
        insert_new(&self.sessions, session.id.clone(), "attestation session", session)
    }

    async fn get_session(&self, id: &SessionId) -> StoreResult<AttestationSession> {
        fetch(&self.sessions, id, "attestation session")
    }

    async fn update_session(
        &self,
        session: AttestationSession,
        expected_version: u64,
    ) -> StoreResult<AttestationSession> {
        let id = session.id.clone();
        replace_versioned(&self.sessions, &id, "attestation session", session, expected_version)
    }

    async fn insert_attestation_request(
        &self,
        request: AttestationRequest,
    ) -> StoreResult<AttestationRequest> {
        let key = (request.session_id.clone(), request.required_role);
        match self.session_roles.entry(key) {
            Entry::Occupied(_) => {
                return Err(StoreError::Duplicate {
                    kind: "attestation request",
                    id: format!("{}/{}", request.session_id, request.required_role),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(request.id.clone());
            }
        }
        insert_new(&self.requests, request.id.clone(), "attestation request", request)
    }

    async fn get_attestation_request(&self, id: &RequestId) -> StoreResult<AttestationRequest> {
        fetch(&self.requests, id, "attestation request")
    }

    async fn update_attestation_request(
        &self,
        request: AttestationRequest,
        expected_version: u64,
    ) -> StoreResult<AttestationRequest> {
        let id = request.id.clone();
        replace_versioned(&self.requests, &id, "attestation request", request, expected_version)
    }

    async fn list_requests_for_session(
        &self,
        session_id: &SessionId,
    ) -> StoreResult<Vec<AttestationRequest>> {
        let mut requests: Vec<AttestationRequest> = self
            .requests
            .iter()
            .filter(|row| &row.session_id == session_id)
            .map(|row| row.value().clone())
            .collect();
        requests.sort_by_key(|r| r.required_role);
        Ok(requests)
    }
}

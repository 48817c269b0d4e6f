// ATTESTATION QUORUM TRACKER
// Per-role signature collection for a session event, with an at-most-once
// case transition when the last signature lands.
//
// SAFETY INVARIANTS:
// 1. One request per (session id, required role); siblings are grouped by
//    session id alone
// 1a. Quorum is judged against the session's required roles, never against
//    whichever requests happen to exist
// 1b. A session whose requests were not all stored is marked abandoned and
//    refuses signatures
// 2. Only the request's target user may sign it
// 3. Re-signing a signed request is a no-op returning the stored signature
// 4. The quorum action fires at most once per session, however many final
//    signatures race
// 5. Signatures are never rolled back because the quorum action failed

use crate::action::{AdvanceCaseStatus, QuorumAction};
use crate::policy::QuorumPolicy;
use crate::trigger::SessionTriggers;
use chrono::Utc;
use futures::future::join_all;
use lexledger_core::{
    quorum_reached, AttestationNotice, AttestationRequest, AttestationSession, CaseId, CaseStatus,
    CourtError, CourtResult, NotificationDispatcher, ParticipantRole, RecordStore, RequestId,
    SessionId, StoreError, TriggerState, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOutcome {
    pub request_id: RequestId,
    pub session_id: SessionId,
    /// Hex-encoded signature as stored.
    pub signature: String,
    pub quorum_reached: bool,
    /// True only for the call that applied the quorum action.
    pub triggered: bool,
    /// True when the request was already signed and nothing changed.
    pub already_signed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub case_id: CaseId,
    pub target_status: CaseStatus,
    pub signed_roles: Vec<ParticipantRole>,
    pub outstanding_roles: Vec<ParticipantRole>,
    pub quorum_reached: bool,
    pub trigger: TriggerState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSweep {
    pub applied: Vec<SessionId>,
    pub still_pending: Vec<SessionId>,
}

pub struct AttestationQuorumTracker {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    action: Arc<dyn QuorumAction>,
    policy: QuorumPolicy,
    triggers: SessionTriggers,
}

impl AttestationQuorumTracker {
    /// Tracker whose quorum action advances the case status.
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        policy: QuorumPolicy,
    ) -> CourtResult<Self> {
        let action = Arc::new(AdvanceCaseStatus::new(store.clone(), policy.conflict_retries));
        Self::with_action(store, dispatcher, action, policy)
    }

    pub fn with_action(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        action: Arc<dyn QuorumAction>,
        policy: QuorumPolicy,
    ) -> CourtResult<Self> {
        policy.validate()?;
        Ok(AttestationQuorumTracker {
            store,
            dispatcher,
            action,
            policy,
            triggers: SessionTriggers::default(),
        })
    }

    /// Open a session and request one attestation per distinct role.
    pub async fn register_session_end(
        &self,
        case_id: &CaseId,
        required_roles: &[ParticipantRole],
        target_status: CaseStatus,
    ) -> CourtResult<SessionId> {
        let mut roles: Vec<ParticipantRole> = Vec::with_capacity(required_roles.len());
        for role in required_roles {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        if roles.is_empty() {
            return Err(CourtError::InvalidInput("a session needs at least one required role".into()));
        }

        let case = self.store.get_case(case_id).await?;
        if !case.status.can_transition_to(target_status) {
            return Err(CourtError::InvalidTransition {
                from: case.status.to_string(),
                to: target_status.to_string(),
            });
        }

        let session = self
            .store
            .insert_session(AttestationSession {
                id: SessionId::generate(),
                case_id: case_id.clone(),
                target_status,
                required_roles: roles.clone(),
                trigger: TriggerState::Pending,
                version: 0,
                created_at: Utc::now(),
            })
            .await?;

        let mut requests = Vec::with_capacity(roles.len());
        for role in &roles {
            let target = case.participants.get(*role).user_id.clone();
            let request = AttestationRequest::new(session.id.clone(), case_id.clone(), *role, target);
            match self.store.insert_attestation_request(request).await {
                Ok(stored) => requests.push(stored),
                Err(err) => {
                    error!(session_id = %session.id, role = %role, error = %err, "attestation request not stored; abandoning session");
                    let state = TriggerState::Abandoned {
                        reason: format!("{} request not stored: {}", role, err),
                    };
                    if let Err(mark_err) = self.record_trigger(&session.id, state).await {
                        warn!(session_id = %session.id, error = %mark_err, "abandoned session not marked");
                    }
                    return Err(err.into());
                }
            }
        }
        info!(session_id = %session.id, case_id = %case_id, roles = ?roles, target = %target_status, "attestation session opened");

        let delivered = self.dispatch_all(&requests).await;
        if delivered < requests.len() {
            warn!(
                session_id = %session.id,
                undelivered = requests.len() - delivered,
                "some attestation notices were not delivered; use redispatch_unsigned"
            );
        }
        Ok(session.id)
    }

    /// Apply `signer`'s signature to a request and re-evaluate the quorum.
    pub async fn sign(
        &self,
        request_id: &RequestId,
        signer: &UserId,
        signature: &[u8],
    ) -> CourtResult<SignOutcome> {
        if signature.is_empty() {
            return Err(CourtError::InvalidInput("empty attestation signature".into()));
        }
        let encoded = hex::encode(signature);
        let mut request = self.store.get_attestation_request(request_id).await?;
        let session = self.store.get_session(&request.session_id).await?;
        if session.is_abandoned() {
            return Err(CourtError::SessionAbandoned(session.id));
        }
        let mut already_signed = false;
        let mut attempts = 0;
        let signed = loop {
            if &request.target_user_id != signer {
                warn!(request_id = %request_id, signer = %signer, "attestation signed by wrong user");
                return Err(CourtError::Unauthorized {
                    user: signer.clone(),
                    request: request_id.clone(),
                });
            }
            if request.is_signed() {
                already_signed = true;
                break request;
            }
            let expected_version = request.version;
            let mut next = request.clone();
            next.signature = Some(encoded.clone());
            next.signed_at = Some(Utc::now());
            match self.store.update_attestation_request(next, expected_version).await {
                Ok(stored) => break stored,
                Err(StoreError::VersionConflict { .. }) if attempts < self.policy.conflict_retries => {
                    attempts += 1;
                    request = self.store.get_attestation_request(request_id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        };
        if !already_signed {
            info!(request_id = %request_id, session_id = %signed.session_id, role = %signed.required_role, "attestation signed");
        }

        let siblings = self.store.list_requests_for_session(&signed.session_id).await?;
        let quorum = quorum_reached(&session, &siblings);
        let triggered = if quorum {
            self.fire(&signed.session_id).await
        } else {
            false
        };

        Ok(SignOutcome {
            request_id: signed.id,
            session_id: signed.session_id,
            signature: signed.signature.unwrap_or_default(),
            quorum_reached: quorum,
            triggered,
            already_signed,
        })
    }

    pub async fn session_status(&self, session_id: &SessionId) -> CourtResult<SessionStatus> {
        let session = self.store.get_session(session_id).await?;
        let requests = self.store.list_requests_for_session(session_id).await?;
        let quorum = quorum_reached(&session, &requests);
        // A required role without any stored request is still outstanding.
        let (signed_roles, outstanding_roles): (Vec<_>, Vec<_>) =
            session.required_roles.iter().copied().partition(|role| {
                requests
                    .iter()
                    .any(|request| request.required_role == *role && request.is_signed())
            });
        Ok(SessionStatus {
            session_id: session.id,
            case_id: session.case_id,
            target_status: session.target_status,
            signed_roles,
            outstanding_roles,
            quorum_reached: quorum,
            trigger: session.trigger,
        })
    }

    /// Re-send notices for every request of the session still unsigned.
    /// Returns how many were delivered.
    pub async fn redispatch_unsigned(&self, session_id: &SessionId) -> CourtResult<usize> {
        let session = self.store.get_session(session_id).await?;
        if session.is_abandoned() {
            return Err(CourtError::SessionAbandoned(session.id));
        }
        let unsigned: Vec<AttestationRequest> = self
            .store
            .list_requests_for_session(session_id)
            .await?
            .into_iter()
            .filter(|request| !request.is_signed())
            .collect();
        Ok(self.dispatch_all(&unsigned).await)
    }

    /// Re-run the quorum action for every session that reached quorum but
    /// has not had it applied.
    pub async fn retry_pending_triggers(&self) -> TriggerSweep {
        let mut sweep = TriggerSweep::default();
        for session_id in self.triggers.unapplied() {
            match self.retry_session_trigger(&session_id).await {
                Ok(true) => sweep.applied.push(session_id),
                Ok(false) => sweep.still_pending.push(session_id),
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "trigger retry skipped");
                    sweep.still_pending.push(session_id);
                }
            }
        }
        sweep
    }

    /// Re-run the quorum action for one session, e.g. after a restart.
    /// Returns true if this call applied it.
    pub async fn retry_session_trigger(&self, session_id: &SessionId) -> CourtResult<bool> {
        let session = self.store.get_session(session_id).await?;
        let requests = self.store.list_requests_for_session(session_id).await?;
        if !quorum_reached(&session, &requests) {
            return Ok(false);
        }
        Ok(self.fire(session_id).await)
    }

    /// Run the quorum action if this caller wins the session claim.
    async fn fire(&self, session_id: &SessionId) -> bool {
        let trigger = self.triggers.get(session_id);
        if trigger.is_applied() || !trigger.try_claim() {
            debug!(session_id = %session_id, "quorum action already claimed");
            return false;
        }

        let session = match self.store.get_session(session_id).await {
            Ok(session) => session,
            Err(err) => {
                error!(session_id = %session_id, error = %err, "session unreadable; trigger released");
                trigger.release();
                return false;
            }
        };
        match session.trigger {
            TriggerState::Applied { .. } => {
                trigger.mark_applied();
                return false;
            }
            TriggerState::Abandoned { .. } => {
                trigger.release();
                return false;
            }
            TriggerState::Pending | TriggerState::Failed { .. } => {}
        }

        let limit = self.policy.action_timeout();
        let result = match tokio::time::timeout(limit, self.action.apply(&session)).await {
            Ok(result) => result,
            Err(_) => Err(CourtError::Timeout {
                operation: "quorum action",
                after: limit,
            }),
        };

        match result {
            Ok(()) => {
                trigger.mark_applied();
                let state = TriggerState::Applied { at: Utc::now() };
                if let Err(err) = self.record_trigger(session_id, state).await {
                    warn!(session_id = %session_id, error = %err, "applied trigger not recorded on session");
                }
                info!(session_id = %session_id, case_id = %session.case_id, "quorum action applied");
                true
            }
            Err(err) => {
                let attempts = match &session.trigger {
                    TriggerState::Failed { attempts, .. } => attempts + 1,
                    _ => 1,
                };
                error!(session_id = %session_id, attempts, error = %err, "quorum action failed; signatures kept");
                let state = TriggerState::Failed {
                    attempts,
                    last_error: err.to_string(),
                };
                if let Err(store_err) = self.record_trigger(session_id, state).await {
                    warn!(session_id = %session_id, error = %store_err, "failed trigger not recorded on session");
                }
                trigger.release();
                false
            }
        }
    }

    async fn record_trigger(&self, session_id: &SessionId, state: TriggerState) -> CourtResult<()> {
        let mut session = self.store.get_session(session_id).await?;
        for _ in 0..=self.policy.conflict_retries {
            let expected_version = session.version;
            let mut next = session.clone();
            next.trigger = state.clone();
            match self.store.update_session(next, expected_version).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    session = self.store.get_session(session_id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CourtError::StaleWrite(format!("session {} kept changing", session_id)))
    }

    async fn dispatch_all(&self, requests: &[AttestationRequest]) -> usize {
        let results = join_all(
            requests
                .iter()
                .map(|request| self.dispatcher.dispatch(AttestationNotice::from(request))),
        )
        .await;
        results
            .iter()
            .zip(requests)
            .filter(|(result, request)| match result {
                Ok(()) => true,
                Err(err) => {
                    warn!(request_id = %request.id, role = %request.required_role, error = %err, "attestation notice not delivered");
                    false
                }
            })
            .count()
    }
}

// Bounded verification of ledger writes.
//
// SAFETY INVARIANTS:
// 1. A read is accepted only if every required slot is non-zero
// 2. Transient read errors consume an attempt; fatal ones abort at once
// 3. Exhaustion always surfaces as `LedgerVerificationFailed`

use crate::policy::SyncPolicy;
use lexledger_core::{
    CourtError, CourtResult, ExternalCaseId, LedgerAddress, LedgerClient, LedgerError,
    LedgerParticipants, LedgerResult, ParticipantRole,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Apply the ledger timeout to a single call.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = LedgerResult<T>>,
) -> LedgerResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout(limit)),
    }
}

/// What a verification read must observe.
#[derive(Debug, Clone)]
pub(crate) enum Expectation {
    /// Case header present and all three required slots assigned.
    CaseCreated,
    /// The given role slot holds the given address.
    RoleAssigned {
        role: ParticipantRole,
        address: LedgerAddress,
    },
}

enum ReadVerdict {
    Valid(LedgerParticipants),
    Invalid(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Verified {
    pub participants: LedgerParticipants,
    pub attempts: u32,
}

pub(crate) struct Verifier<'a> {
    ledger: &'a dyn LedgerClient,
    policy: &'a SyncPolicy,
}

impl<'a> Verifier<'a> {
    pub(crate) fn new(ledger: &'a dyn LedgerClient, policy: &'a SyncPolicy) -> Self {
        Verifier { ledger, policy }
    }

    /// Re-read the ledger until `expectation` holds or attempts run out.
    /// `on_attempt` observes every attempt and its failure reason.
    pub(crate) async fn verify(
        &self,
        id: &ExternalCaseId,
        expectation: &Expectation,
        mut on_attempt: impl FnMut(Option<String>),
    ) -> CourtResult<Verified> {
        let mut last_error = String::from("no verification read performed");
        for attempt in 1..=self.policy.verify_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.verify_delay()).await;
            }
            match self.read(id, expectation).await {
                Ok(ReadVerdict::Valid(participants)) => {
                    debug!(external_case_id = %id, attempt, "ledger state verified");
                    on_attempt(None);
                    return Ok(Verified {
                        participants,
                        attempts: attempt,
                    });
                }
                Ok(ReadVerdict::Invalid(reason)) => {
                    warn!(external_case_id = %id, attempt, %reason, "ledger read not yet valid");
                    on_attempt(Some(reason.clone()));
                    last_error = reason;
                }
                Err(err) if err.is_retryable() => {
                    warn!(external_case_id = %id, attempt, error = %err, "transient ledger read failure");
                    on_attempt(Some(err.to_string()));
                    last_error = err.to_string();
                }
                Err(err) => {
                    on_attempt(Some(err.to_string()));
                    return Err(err.into());
                }
            }
        }
        Err(CourtError::LedgerVerificationFailed {
            external_case_id: id.clone(),
            attempts: self.policy.verify_attempts,
            last_error,
        })
    }

    async fn read(&self, id: &ExternalCaseId, expectation: &Expectation) -> LedgerResult<ReadVerdict> {
        let limit = self.policy.ledger_timeout();
        match expectation {
            Expectation::CaseCreated => {
                let case = bounded(limit, self.ledger.read_case(id)).await?;
                if case.id.trim().is_empty() {
                    return Ok(ReadVerdict::Invalid("ledger returned an empty case id".into()));
                }
                if case.id != id.as_str() {
                    return Ok(ReadVerdict::Invalid(format!(
                        "ledger returned case {} for {}",
                        case.id, id
                    )));
                }
                if case.title.trim().is_empty() {
                    return Ok(ReadVerdict::Invalid("ledger returned an empty title".into()));
                }
                let participants = bounded(limit, self.ledger.read_participants(id)).await?;
                let missing = participants.unassigned_required_roles();
                if !missing.is_empty() {
                    return Ok(ReadVerdict::Invalid(format!(
                        "unassigned ledger slots: {:?}",
                        missing
                    )));
                }
                Ok(ReadVerdict::Valid(participants))
            }
            Expectation::RoleAssigned { role, address } => {
                let participants = bounded(limit, self.ledger.read_participants(id)).await?;
                let on_ledger = participants.address_of(role.ledger_role());
                if on_ledger.is_zero() {
                    return Ok(ReadVerdict::Invalid(format!("{} slot unassigned on ledger", role)));
                }
                if !on_ledger.same_account(address) {
                    return Ok(ReadVerdict::Invalid(format!(
                        "{} slot holds {} instead of {}",
                        role, on_ledger, address
                    )));
                }
                Ok(ReadVerdict::Valid(participants))
            }
        }
    }
}

// Error taxonomy.
//
// Each consumed interface has its own error enum; all of them convert into
// `CourtError`, the taxonomy surfaced to callers of the coordinators.
// Every variant names a specific, actionable condition.

use crate::case::ParticipantRole;
use crate::ids::{CaseId, EvidenceId, ExternalCaseId, RequestId, SessionId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a `LedgerClient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("signer rejected the ledger transaction")]
    UserRejected,

    #[error("insufficient funds to pay for the ledger transaction")]
    InsufficientFunds,

    #[error("ledger authorization rejected the role assignment: {0}")]
    RoleAuthorization(String),

    #[error("ledger network error: {0}")]
    Network(String),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("case {0} not found on ledger")]
    CaseNotFound(String),

    /// The create was refused because the external id is already taken,
    /// typically by an earlier broadcast of the same transaction.
    #[error("case {0} already registered on ledger")]
    AlreadyRegistered(String),

    #[error("ledger transaction reverted: {0}")]
    Reverted(String),
}

impl LedgerError {
    /// Transient conditions that may succeed on a later attempt.
    ///
    /// `CaseNotFound` is transient because a freshly broadcast transaction
    /// may not be visible to reads yet.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Network(_) | LedgerError::Timeout(_) | LedgerError::CaseNotFound(_)
        )
    }
}

/// Failures reported by a `RecordStore`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    #[error("{kind} {id} version conflict: expected {expected}, found {found}")]
    VersionConflict {
        kind: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("{kind} {id}: field {field} is immutable")]
    ImmutableField {
        kind: &'static str,
        id: String,
        field: &'static str,
    },

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a `Signer`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("signer rejected the request")]
    UserRejected,

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a `NotificationDispatcher`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Domain error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CourtError {
    #[error("{role} candidate {user} has no resolvable ledger address")]
    MissingLedgerIdentity { role: ParticipantRole, user: UserId },

    #[error("ledger verification of {external_case_id} failed after {attempts} attempt(s): {last_error}")]
    LedgerVerificationFailed {
        external_case_id: ExternalCaseId,
        attempts: u32,
        last_error: String,
    },

    #[error("signer rejected the request")]
    UserRejected,

    #[error("insufficient funds to pay for the ledger transaction")]
    InsufficientFunds,

    #[error("ledger authorization rejected the role assignment: {0}")]
    RoleAuthorization(String),

    #[error("transient ledger failure: {0}")]
    NetworkTransient(String),

    #[error("user {user} is not the assigned signer of request {request}")]
    Unauthorized { user: UserId, request: RequestId },

    #[error("user {user} lacks the {capability} capability")]
    MissingCapability { user: UserId, capability: &'static str },

    #[error("a seal of evidence {0} is already in progress")]
    AlreadyInProgress(EvidenceId),

    #[error("case {case_id} diverges from the ledger for {roles:?}")]
    DivergentState {
        case_id: CaseId,
        roles: Vec<ParticipantRole>,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("evidence {0} is immutable")]
    ImmutableEvidence(EvidenceId),

    #[error("stale write rejected: {0}")]
    StaleWrite(String),

    #[error("operation cancelled before the irreversible step")]
    Cancelled,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("record store error: {0}")]
    Store(StoreError),

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("ledger rejected the transaction: {0}")]
    LedgerRejected(String),

    #[error("attestation session {0} was abandoned during registration")]
    SessionAbandoned(SessionId),
}

impl CourtError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CourtError::NetworkTransient(_) | CourtError::Timeout { .. } => true,
            CourtError::Store(StoreError::Unavailable(_)) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CourtError::Store(StoreError::NotFound { .. }))
    }
}

impl From<LedgerError> for CourtError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UserRejected => CourtError::UserRejected,
            LedgerError::InsufficientFunds => CourtError::InsufficientFunds,
            LedgerError::RoleAuthorization(msg) => CourtError::RoleAuthorization(msg),
            LedgerError::Network(msg) => CourtError::NetworkTransient(msg),
            LedgerError::Timeout(after) => CourtError::Timeout {
                operation: "ledger call",
                after,
            },
            LedgerError::CaseNotFound(id) => {
                CourtError::NetworkTransient(format!("case {} not yet visible on ledger", id))
            }
            LedgerError::AlreadyRegistered(id) => {
                CourtError::LedgerRejected(format!("case {} already registered", id))
            }
            LedgerError::Reverted(msg) => CourtError::LedgerRejected(msg),
        }
    }
}

impl From<StoreError> for CourtError {
    fn from(err: StoreError) -> Self {
        CourtError::Store(err)
    }
}

impl From<SignerError> for CourtError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::UserRejected => CourtError::UserRejected,
            SignerError::Unavailable(msg) => CourtError::SignerUnavailable(msg),
        }
    }
}

pub type CourtResult<T> = Result<T, CourtError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
pub type StoreResult<T> = Result<T, StoreError>;

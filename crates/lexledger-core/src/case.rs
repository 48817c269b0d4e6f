// Case records.
//
// INVARIANTS:
// 1. `external_case_id` is minted once and never regenerated
// 2. `ledger_participants` may transiently diverge from `participants`
// 3. Divergence is always computable from the row itself and is surfaced
//    through `sync_state` and `divergence()`, never hidden

use crate::errors::{CourtError, CourtResult};
use crate::ids::{CaseId, ExternalCaseId, LedgerAddress, TxHash, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Application roles that hold a participant assignment on a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Judge,
    Prosecution,
    Defence,
}

impl ParticipantRole {
    pub const ALL: [ParticipantRole; 3] = [
        ParticipantRole::Judge,
        ParticipantRole::Prosecution,
        ParticipantRole::Defence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Judge => "judge",
            ParticipantRole::Prosecution => "prosecution",
            ParticipantRole::Defence => "defence",
        }
    }

    pub fn ledger_role(&self) -> LedgerRole {
        match self {
            ParticipantRole::Judge => LedgerRole::Judge,
            ParticipantRole::Prosecution => LedgerRole::Prosecution,
            ParticipantRole::Defence => LedgerRole::Defence,
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role slots as the ledger contract knows them. The clerk slot is filled
/// by the ledger itself and is never reassigned through the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRole {
    Judge,
    Clerk,
    Prosecution,
    Defence,
}

impl fmt::Display for LedgerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerRole::Judge => "judge",
            LedgerRole::Clerk => "clerk",
            LedgerRole::Prosecution => "prosecution",
            LedgerRole::Defence => "defence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Filed,
    Active,
    Hearing,
    VerdictPending,
    Closed,
    Appealed,
}

impl CaseStatus {
    /// Forward workflow edges. `Hearing -> Active` covers adjournment and
    /// `Appealed -> Hearing` re-opens proceedings on appeal.
    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        matches!(
            (self, next),
            (Filed, Active)
                | (Active, Hearing)
                | (Hearing, VerdictPending)
                | (Hearing, Active)
                | (VerdictPending, Closed)
                | (Closed, Appealed)
                | (Appealed, Hearing)
        )
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaseStatus::Filed => "filed",
            CaseStatus::Active => "active",
            CaseStatus::Hearing => "hearing",
            CaseStatus::VerdictPending => "verdict_pending",
            CaseStatus::Closed => "closed",
            CaseStatus::Appealed => "appealed",
        };
        f.write_str(name)
    }
}

/// Three-state agreement indicator between the record store and the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Ledger confirmation outstanding (e.g. verified row awaiting commit).
    Pending,
    /// Every assignment matches the ledger.
    Verified,
    /// At least one assignment is not confirmed on the ledger.
    Divergent,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Pending => "pending",
            SyncState::Verified => "verified",
            SyncState::Divergent => "divergent",
        };
        f.write_str(name)
    }
}

/// A user assigned to a role, with the ledger address that identifies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub user_id: UserId,
    pub ledger_address: LedgerAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub judge: Assignment,
    pub prosecution: Assignment,
    pub defence: Assignment,
}

impl Participants {
    pub fn get(&self, role: ParticipantRole) -> &Assignment {
        match role {
            ParticipantRole::Judge => &self.judge,
            ParticipantRole::Prosecution => &self.prosecution,
            ParticipantRole::Defence => &self.defence,
        }
    }

    pub fn set(&mut self, role: ParticipantRole, assignment: Assignment) {
        match role {
            ParticipantRole::Judge => self.judge = assignment,
            ParticipantRole::Prosecution => self.prosecution = assignment,
            ParticipantRole::Defence => self.defence = assignment,
        }
    }

    /// Role currently held by `user`, if any.
    pub fn role_of(&self, user: &UserId) -> Option<ParticipantRole> {
        ParticipantRole::ALL
            .into_iter()
            .find(|role| &self.get(*role).user_id == user)
    }
}

/// Participant addresses as last read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParticipants {
    pub judge: LedgerAddress,
    pub clerk: LedgerAddress,
    pub prosecution: LedgerAddress,
    pub defence: LedgerAddress,
}

impl LedgerParticipants {
    pub fn unassigned() -> Self {
        LedgerParticipants {
            judge: LedgerAddress::zero(),
            clerk: LedgerAddress::zero(),
            prosecution: LedgerAddress::zero(),
            defence: LedgerAddress::zero(),
        }
    }

    pub fn address_of(&self, role: LedgerRole) -> &LedgerAddress {
        match role {
            LedgerRole::Judge => &self.judge,
            LedgerRole::Clerk => &self.clerk,
            LedgerRole::Prosecution => &self.prosecution,
            LedgerRole::Defence => &self.defence,
        }
    }

    pub fn set_address(&mut self, role: LedgerRole, address: LedgerAddress) {
        match role {
            LedgerRole::Judge => self.judge = address,
            LedgerRole::Clerk => self.clerk = address,
            LedgerRole::Prosecution => self.prosecution = address,
            LedgerRole::Defence => self.defence = address,
        }
    }

    /// Required roles (judge, prosecution, defence) whose slot is unassigned.
    pub fn unassigned_required_roles(&self) -> Vec<ParticipantRole> {
        ParticipantRole::ALL
            .into_iter()
            .filter(|role| self.address_of(role.ledger_role()).is_zero())
            .collect()
    }
}

/// One role whose application assignment is not what the ledger holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDivergence {
    pub role: ParticipantRole,
    pub assigned_user: UserId,
    pub expected_address: LedgerAddress,
    pub ledger_address: LedgerAddress,
}

/// Explicit rendering of a case's disagreement with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub case_id: CaseId,
    pub external_case_id: ExternalCaseId,
    pub roles: Vec<RoleDivergence>,
    /// Why the ledger was not brought in line, when known.
    pub cause: Option<String>,
}

impl DivergenceReport {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn role_names(&self) -> Vec<ParticipantRole> {
        self.roles.iter().map(|r| r.role).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub external_case_id: ExternalCaseId,
    pub title: String,
    pub fir_ref: String,
    pub status: CaseStatus,
    pub participants: Participants,
    pub ledger_participants: LedgerParticipants,
    pub sync_state: SyncState,
    /// Last verified ledger transaction for this case.
    pub tx_hash: Option<TxHash>,
    pub metadata: BTreeMap<String, String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    pub fn divergence(&self) -> Vec<RoleDivergence> {
        ParticipantRole::ALL
            .into_iter()
            .filter_map(|role| {
                let assignment = self.participants.get(role);
                let on_ledger = self.ledger_participants.address_of(role.ledger_role());
                if assignment.ledger_address.same_account(on_ledger) {
                    None
                } else {
                    Some(RoleDivergence {
                        role,
                        assigned_user: assignment.user_id.clone(),
                        expected_address: assignment.ledger_address.clone(),
                        ledger_address: on_ledger.clone(),
                    })
                }
            })
            .collect()
    }

    pub fn divergence_report(&self, cause: Option<String>) -> DivergenceReport {
        DivergenceReport {
            case_id: self.id.clone(),
            external_case_id: self.external_case_id.clone(),
            roles: self.divergence(),
            cause,
        }
    }

    /// Sync state implied by the row's own data.
    pub fn derived_sync_state(&self) -> SyncState {
        if self.divergence().is_empty() {
            SyncState::Verified
        } else {
            SyncState::Divergent
        }
    }

    pub fn advance_status(&mut self, next: CaseStatus) -> CourtResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CourtError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A proposed participant: the application user plus their ledger address,
/// if their wallet identity could be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub user_id: UserId,
    pub ledger_address: Option<LedgerAddress>,
}

impl Candidate {
    pub fn new(user_id: impl Into<UserId>, ledger_address: Option<LedgerAddress>) -> Self {
        Candidate {
            user_id: user_id.into(),
            ledger_address,
        }
    }

    /// Resolve the candidate into an assignment, rejecting missing and zero
    /// addresses.
    pub fn resolve(&self, role: ParticipantRole) -> CourtResult<Assignment> {
        match &self.ledger_address {
            Some(address) if !address.is_zero() => Ok(Assignment {
                user_id: self.user_id.clone(),
                ledger_address: address.clone(),
            }),
            _ => Err(CourtError::MissingLedgerIdentity {
                role,
                user: self.user_id.clone(),
            }),
        }
    }
}

/// Input to case creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDraft {
    pub title: String,
    pub fir_ref: String,
    pub judge: Candidate,
    pub prosecution: Candidate,
    pub defence: Candidate,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CaseDraft {
    pub fn candidate(&self, role: ParticipantRole) -> &Candidate {
        match role {
            ParticipantRole::Judge => &self.judge,
            ParticipantRole::Prosecution => &self.prosecution,
            ParticipantRole::Defence => &self.defence,
        }
    }

    /// Resolve all three candidates. Fails on the first missing identity.
    pub fn resolve_participants(&self) -> CourtResult<Participants> {
        Ok(Participants {
            judge: self.judge.resolve(ParticipantRole::Judge)?,
            prosecution: self.prosecution.resolve(ParticipantRole::Prosecution)?,
            defence: self.defence.resolve(ParticipantRole::Defence)?,
        })
    }
}

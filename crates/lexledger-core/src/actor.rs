// Acting identities and the capabilities their roles grant.

use crate::ids::{LedgerAddress, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Judge,
    Clerk,
    Prosecution,
    Defence,
    Investigator,
    Observer,
}

impl ActorRole {
    pub fn can_upload(&self) -> bool {
        !matches!(self, ActorRole::Observer)
    }

    /// Sealing is a single-role act reserved to the bench.
    pub fn can_seal(&self) -> bool {
        matches!(self, ActorRole::Judge)
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorRole::Judge => "judge",
            ActorRole::Clerk => "clerk",
            ActorRole::Prosecution => "prosecution",
            ActorRole::Defence => "defence",
            ActorRole::Investigator => "investigator",
            ActorRole::Observer => "observer",
        };
        f.write_str(name)
    }
}

/// An authenticated caller. Authentication itself happens upstream; this is
/// the identity it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: ActorRole,
    pub ledger_address: Option<LedgerAddress>,
}

impl Actor {
    pub fn new(user_id: impl Into<UserId>, role: ActorRole) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
            ledger_address: None,
        }
    }

    pub fn with_address(mut self, address: LedgerAddress) -> Self {
        self.ledger_address = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_judges_seal() {
        assert!(ActorRole::Judge.can_seal());
        assert!(!ActorRole::Clerk.can_seal());
        assert!(!ActorRole::Prosecution.can_seal());
    }

    #[test]
    fn observers_cannot_upload() {
        assert!(!ActorRole::Observer.can_upload());
        assert!(ActorRole::Investigator.can_upload());
    }
}

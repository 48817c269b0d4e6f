// Identifier newtypes shared by every LexLedger crate.
//
// All identifiers are carried as strings so that the correlation key
// (`ExternalCaseId`) can be persisted verbatim on the ledger and in the
// record store without any transformation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(
    /// Record-store primary key of a case.
    CaseId
);
string_id!(
    /// Caller-minted correlation key between the ledger and the record store.
    ExternalCaseId
);
string_id!(EvidenceId);
string_id!(SessionId);
string_id!(RequestId);
string_id!(UserId);
string_id!(
    /// Handle of a submitted ledger transaction.
    TxHash
);
string_id!(
    /// Ledger account address, `0x`-prefixed hex.
    LedgerAddress
);

impl CaseId {
    pub fn generate() -> Self {
        CaseId(Uuid::new_v4().to_string())
    }
}

impl ExternalCaseId {
    /// Mint a fresh correlation key. Called exactly once per case.
    pub fn mint() -> Self {
        ExternalCaseId(format!("CASE-{}", Uuid::new_v4().simple()).to_uppercase())
    }
}

impl EvidenceId {
    pub fn generate() -> Self {
        EvidenceId(Uuid::new_v4().to_string())
    }
}

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }
}

impl RequestId {
    pub fn generate() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl LedgerAddress {
    /// The unassigned sentinel returned by the ledger for empty role slots.
    pub fn zero() -> Self {
        LedgerAddress(format!("0x{}", "0".repeat(40)))
    }

    /// True for the empty string and for any all-zero hex value.
    pub fn is_zero(&self) -> bool {
        let digits = self.0.trim().trim_start_matches("0x").trim_start_matches("0X");
        digits.chars().all(|c| c == '0')
    }

    /// Addresses are compared case-insensitively; checksummed and lower-case
    /// renderings of the same account are equal.
    pub fn same_account(&self, other: &LedgerAddress) -> bool {
        self.0.trim().eq_ignore_ascii_case(other.0.trim())
    }
}

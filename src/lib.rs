//! LexLedger: court case records mirrored on a permissioned ledger.
//!
//! The record store is a verified projection of the ledger. Case creation and
//! participant reassignment go through [`sync::CaseSyncCoordinator`],
//! evidence custody and judge sealing through
//! [`custody::EvidenceCustodyManager`], and session finalization through
//! [`attest::AttestationQuorumTracker`].

pub use lexledger_attest as attest;
pub use lexledger_cli as cli;
pub use lexledger_core as domain;
pub use lexledger_custody as custody;
pub use lexledger_sync as sync;

pub use lexledger_core::{CourtError, CourtResult};

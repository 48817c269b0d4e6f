// MULTI-PARTY ATTESTATION
// Quorum-gated session finalization.
pub mod action;
pub mod policy;
pub mod tracker;
mod trigger;

pub use action::{AdvanceCaseStatus, QuorumAction};
pub use policy::QuorumPolicy;
pub use tracker::{AttestationQuorumTracker, SessionStatus, SignOutcome, TriggerSweep};

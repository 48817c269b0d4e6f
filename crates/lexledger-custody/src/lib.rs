// EVIDENCE CUSTODY
// Upload, review and judge sealing of case evidence.
mod claim;
pub mod manager;
mod outbox;
pub mod policy;

pub use claim::SealPhase;
pub use manager::{AuditSweep, EvidenceCustodyManager, SealOutcome};
pub use policy::SealPolicy;

pub use tokio_util::sync::CancellationToken;

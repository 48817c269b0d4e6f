// CASE SYNC LAYER
// Dual-write coordination between the ledger and the record store.
pub mod coordinator;
pub mod journal;
pub mod policy;
pub mod reconcile;
mod verification;

pub use coordinator::{
    CaseSyncCoordinator, CommitSweep, CreateCaseOutcome, ReassignOptions, ReassignOutcome,
};
pub use journal::SyncJournal;
pub use policy::{SyncPolicy, MIN_VERIFY_DELAY};
pub use reconcile::CaseView;

pub use tokio_util::sync::CancellationToken;

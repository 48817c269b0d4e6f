// === Data Model ===
pub mod ids;
pub mod actor;
pub mod case;
pub mod evidence;
pub mod attestation;
pub mod sync_job;

// === Error Taxonomy ===
pub mod errors;

// === Consumed Interfaces ===
pub mod ledger;
pub mod store;
pub mod signer;
pub mod notify;

// === In-Process Adapters ===
pub mod memory;

// === Re-exports for the coordinator crates ===
pub use actor::{Actor, ActorRole};
pub use attestation::*;
pub use case::*;
pub use errors::*;
pub use evidence::*;
pub use ids::*;
pub use ledger::*;
pub use notify::*;
pub use signer::Signer;
pub use store::RecordStore;
pub use sync_job::*;

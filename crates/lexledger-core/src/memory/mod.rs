//! In-process adapters for every consumed interface. Used by the CLI
//! simulation and by the test suites of the coordinator crates.

mod dispatch;
mod ledger;
mod signer;
mod store;

pub use dispatch::{RecordingDispatcher, StaticDirectory};
pub use ledger::{InMemoryLedger, LedgerCall};
pub use signer::HmacSigner;
pub use store::InMemoryRecordStore;

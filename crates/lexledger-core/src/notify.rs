// Outbound notification channel and the participant directory.

use crate::attestation::AttestationNotice;
use crate::errors::DispatchError;
use crate::ids::{LedgerAddress, UserId};
use async_trait::async_trait;

/// Delivers attestation requests to their target users. The consumer calls
/// back into the quorum tracker once the user has signed.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notice: AttestationNotice) -> Result<(), DispatchError>;
}

/// Maps ledger addresses back to application users. Used when a record-store
/// row has to be rebuilt from ledger data alone.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn user_for_address(&self, address: &LedgerAddress) -> Option<UserId>;
}

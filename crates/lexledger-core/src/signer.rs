// External signer interface (wallet / HSM). May refuse with `UserRejected`.

use crate::errors::SignerError;
use crate::ids::UserId;
use async_trait::async_trait;

#[async_trait]
pub trait Signer: Send + Sync {
    /// Identity the signatures are attributed to.
    fn signer_id(&self) -> &UserId;

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

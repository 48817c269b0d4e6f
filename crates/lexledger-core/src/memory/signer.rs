// Keyed HMAC-SHA256 signer standing in for a wallet.

use crate::errors::SignerError;
use crate::ids::UserId;
use crate::signer::Signer;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub struct HmacSigner {
    signer_id: UserId,
    key: Vec<u8>,
    reject_next: AtomicBool,
    delay: Option<Duration>,
    signatures: AtomicUsize,
}

impl HmacSigner {
    pub fn new(signer_id: impl Into<UserId>, key: impl Into<Vec<u8>>) -> Self {
        HmacSigner {
            signer_id: signer_id.into(),
            key: key.into(),
            reject_next: AtomicBool::new(false),
            delay: None,
            signatures: AtomicUsize::new(0),
        }
    }

    /// Simulate a user who takes `delay` to approve each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next signing request is refused, as if the user dismissed it.
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }

    fn mac(&self) -> Result<HmacSha256, SignerError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| SignerError::Unavailable(e.to_string()))
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(message);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Signer for HmacSigner {
    fn signer_id(&self) -> &UserId {
        &self.signer_id
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(SignerError::UserRejected);
        }
        let mut mac = self.mac()?;
        mac.update(message);
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

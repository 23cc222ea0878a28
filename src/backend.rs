//! The two contracts upstream flows use to reach a signer.

use crate::Result;
use async_trait::async_trait;

/// A source of signatures, backed either by the custody worker (software
/// keys) or by a hardware device behind the command queue.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Sign an EIP-191 personal message with the key at `index`.
    async fn sign_message(&self, index: usize, message: &str) -> Result<String>;

    /// Whether `address` belongs to the key at `index`.
    async fn verify_address(&self, index: usize, address: &str) -> Result<bool>;
}

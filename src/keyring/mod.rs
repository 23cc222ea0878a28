//! Keyring storage and signing
//!
//! SECURITY: raw private keys exist only inside [`Keyring`] values, which are
//! owned by the custody worker thread and zeroed on drop. Everything that
//! leaves this module is either an encrypted blob or a signature.

mod signer;
pub mod vault;

pub(crate) use signer::message_bytes;
pub use signer::{recover_personal_signer, KeyResolver, SigningExecutor, SIGNATURE_LEN};

use crate::config::KdfParams;
use crate::{Error, Result};
use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use secrecy::SecretString;
use zeroize::Zeroizing;

/// Separator between hex keys in the plaintext form of a blob
const KEY_SEPARATOR: char = ':';

/// Raw secp256k1 private key bytes
pub type RawKey = Zeroizing<[u8; 32]>;

/// Ordered, index-addressable set of private keys.
///
/// No `Serialize` or `Clone`: a keyring only leaves memory through
/// [`Keyring::encrypt`].
#[derive(Default)]
pub struct Keyring {
    keys: Vec<RawKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decrypt a blob into a keyring.
    ///
    /// Decryption and parsing failures are both [`Error::InvalidPassword`].
    pub fn decrypt(blob: &str, password: &SecretString) -> Result<Self> {
        let plaintext = vault::decrypt(blob, password)?;
        let text = std::str::from_utf8(&plaintext).map_err(|_| Error::InvalidPassword)?;
        let keys = text
            .split(KEY_SEPARATOR)
            .map(parse_key)
            .collect::<Result<Vec<_>>>()
            .map_err(|_| Error::InvalidPassword)?;
        Ok(Self { keys })
    }

    /// Encrypt the keyring into a blob.
    pub fn encrypt(&self, password: &SecretString, kdf: &KdfParams) -> Result<String> {
        if self.keys.is_empty() {
            return Err(Error::NoKeys);
        }
        let mut plaintext = Zeroizing::new(String::with_capacity(self.keys.len() * 65));
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                plaintext.push(KEY_SEPARATOR);
            }
            plaintext.push_str(&Zeroizing::new(hex::encode(key.as_slice())));
        }
        vault::encrypt(plaintext.as_bytes(), password, kdf)
    }

    pub fn push(&mut self, key: RawKey) {
        self.keys.push(key);
    }

    /// Remove the key at `index`, leaving every other entry in place even when
    /// the same key value appears more than once.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.keys.len() {
            return Err(Error::KeyNotFound(index));
        }
        // Dropping the removed entry zeroes it
        self.keys.remove(index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
impl Keyring {
    /// Public addresses of every key, in keyring order.
    pub(crate) fn addresses(&self) -> Result<Vec<alloy::primitives::Address>> {
        (0..self.keys.len())
            .map(|index| self.resolve(index).map(|signer| signer.address()))
            .collect()
    }
}

impl KeyResolver for Keyring {
    fn resolve(&self, index: usize) -> Result<PrivateKeySigner> {
        let key = self.keys.get(index).ok_or(Error::KeyNotFound(index))?;
        PrivateKeySigner::from_bytes(&B256::from(**key))
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("len", &self.keys.len())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// Parse a hex private key (with or without `0x`), rejecting anything that is
/// not a valid secp256k1 scalar.
pub fn parse_key(input: &str) -> Result<RawKey> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = Zeroizing::new(
        hex::decode(trimmed).map_err(|e| Error::InvalidKey(format!("Invalid hex: {}", e)))?,
    );
    if bytes.len() != 32 {
        return Err(Error::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes);
    PrivateKeySigner::from_bytes(&B256::from(*key))
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(key)
}

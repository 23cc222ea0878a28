//! Password encryption for keyring blobs.
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id, cost parameters recorded in the blob header
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! # Blob layout
//!
//! Hex encoding of:
//!
//! ```text
//! version (1) | memory_kib (4, BE) | iterations (4, BE) | parallelism (4, BE)
//!   | salt (16) | nonce (12) | ciphertext + tag
//! ```

use crate::config::KdfParams;
use crate::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

/// Current blob format version
pub const BLOB_VERSION: u8 = 1;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Upper bound on the memory cost accepted from a blob header (4 GiB)
const MAX_MEMORY_KIB: u32 = 4 * 1024 * 1024;

const PARAMS_LEN: usize = 12;
const HEADER_LEN: usize = 1 + PARAMS_LEN + SALT_LEN + NONCE_LEN;

/// Encrypt `plaintext` under `password`, returning the hex blob.
pub fn encrypt(plaintext: &[u8], password: &SecretString, kdf: &KdfParams) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt, kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    blob.push(BLOB_VERSION);
    blob.extend_from_slice(&kdf.memory_kib.to_be_bytes());
    blob.extend_from_slice(&kdf.iterations.to_be_bytes());
    blob.extend_from_slice(&kdf.parallelism.to_be_bytes());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(hex::encode(blob))
}

/// Decrypt a hex blob produced by [`encrypt`].
///
/// Every failure, including a malformed blob, is reported as
/// [`Error::InvalidPassword`].
pub fn decrypt(blob: &str, password: &SecretString) -> Result<Zeroizing<Vec<u8>>> {
    let raw = hex::decode(blob.trim()).map_err(|_| Error::InvalidPassword)?;
    if raw.len() < HEADER_LEN + AUTH_TAG_LEN || raw[0] != BLOB_VERSION {
        return Err(Error::InvalidPassword);
    }

    let kdf = KdfParams {
        memory_kib: read_u32(&raw[1..5]),
        iterations: read_u32(&raw[5..9]),
        parallelism: read_u32(&raw[9..13]),
    };
    if kdf.memory_kib > MAX_MEMORY_KIB {
        return Err(Error::InvalidPassword);
    }

    let salt = &raw[1 + PARAMS_LEN..1 + PARAMS_LEN + SALT_LEN];
    let nonce = &raw[1 + PARAMS_LEN + SALT_LEN..HEADER_LEN];
    let ciphertext = &raw[HEADER_LEN..];

    let key = derive_key(password, salt, &kdf).map_err(|_| Error::InvalidPassword)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::InvalidPassword)?;

    Ok(Zeroizing::new(plaintext))
}

fn derive_key(
    password: &SecretString,
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| Error::Crypto(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {e}")))?;
    Ok(key)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn decrypts_with_correct_password() {
        let blob = encrypt(b"secret keys", &password("hunter2"), &KdfParams::fast()).unwrap();
        let plaintext = decrypt(&blob, &password("hunter2")).unwrap();
        assert_eq!(plaintext.as_slice(), b"secret keys");
    }

    #[test]
    fn wrong_password_is_invalid_password() {
        let blob = encrypt(b"secret keys", &password("hunter2"), &KdfParams::fast()).unwrap();
        let err = decrypt(&blob, &password("hunter3")).unwrap_err();
        assert!(matches!(err, Error::InvalidPassword));
    }

    #[test]
    fn blobs_use_fresh_salt_and_nonce() {
        let a = encrypt(b"same", &password("pw"), &KdfParams::fast()).unwrap();
        let b = encrypt(b"same", &password("pw"), &KdfParams::fast()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_blobs_are_invalid_password() {
        let zeros = "00".repeat(HEADER_LEN + AUTH_TAG_LEN);
        for blob in ["", "zz", "01", zeros.as_str()] {
            let err = decrypt(blob, &password("pw")).unwrap_err();
            assert!(matches!(err, Error::InvalidPassword), "blob {blob:?}");
        }
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let blob = encrypt(b"secret keys", &password("pw"), &KdfParams::fast()).unwrap();
        let mut raw = hex::decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = decrypt(&hex::encode(raw), &password("pw")).unwrap_err();
        assert!(matches!(err, Error::InvalidPassword));
    }

    #[test]
    fn header_records_kdf_params() {
        let kdf = KdfParams::fast();
        let blob = encrypt(b"x", &password("pw"), &kdf).unwrap();
        let raw = hex::decode(blob).unwrap();
        assert_eq!(raw[0], BLOB_VERSION);
        assert_eq!(read_u32(&raw[1..5]), kdf.memory_kib);
        assert_eq!(read_u32(&raw[5..9]), kdf.iterations);
        assert_eq!(read_u32(&raw[9..13]), kdf.parallelism);
    }
}

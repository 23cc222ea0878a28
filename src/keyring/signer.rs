//! Signing executor
//!
//! SECURITY: signing operations borrow a key resolver for the duration of a
//! single call. Signers are built per call and dropped (and zeroed) with it.
//! - Keys are never serialized to JSON
//! - Keys are never logged
//! - Only signatures and addresses are returned

use crate::{Error, Result};
use alloy::consensus::{SignableTransaction, TxEnvelope, TypedTransaction};
use alloy::dyn_abi::TypedData;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Signature};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of an `r || s || v` signature
pub const SIGNATURE_LEN: usize = 65;

/// Strategy that turns a key index into a signer.
pub trait KeyResolver {
    fn resolve(&self, index: usize) -> Result<PrivateKeySigner>;
}

/// Executes signing operations against whatever keys `R` resolves.
pub struct SigningExecutor<'a, R: KeyResolver> {
    keys: &'a R,
}

impl<'a, R: KeyResolver> SigningExecutor<'a, R> {
    pub fn new(keys: &'a R) -> Self {
        Self { keys }
    }

    /// Sign an EIP-191 personal message.
    ///
    /// `0x`-prefixed hex is signed as the decoded bytes; anything else as UTF-8.
    pub fn sign_message(&self, index: usize, message: &str) -> Result<String> {
        let signer = self.keys.resolve(index)?;
        let signature = signer
            .sign_message_sync(&message_bytes(message))
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(encode_signature(&signature))
    }

    /// Sign an EIP-712 typed data document.
    pub fn sign_typed_data(&self, index: usize, typed_data: &TypedData) -> Result<String> {
        let hash = typed_data
            .eip712_signing_hash()
            .map_err(|e| Error::InvalidParams(format!("Invalid typed data: {}", e)))?;
        let signer = self.keys.resolve(index)?;
        let signature = signer
            .sign_hash_sync(&hash)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(encode_signature(&signature))
    }

    /// Sign a transaction request, returning the EIP-2718 encoded signed
    /// transaction.
    pub fn sign_transaction(&self, index: usize, request: TransactionRequest) -> Result<String> {
        let mut tx: TypedTransaction = request.build_typed_tx().map_err(|_| {
            Error::InvalidParams("Transaction request is missing required fields".to_string())
        })?;
        let signer = self.keys.resolve(index)?;
        let signature = signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| Error::Signing(e.to_string()))?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        Ok(format!("0x{}", hex::encode(envelope.encoded_2718())))
    }

    /// Prove that the key at `index` controls `claimed`.
    ///
    /// Signs a random challenge and recovers the signer from the signature,
    /// so a mismatch between the stored key and the address the caller
    /// believes it has is caught.
    pub fn verify_address(&self, index: usize, claimed: &str) -> Result<bool> {
        let mut challenge = [0u8; 32];
        OsRng.fill_bytes(&mut challenge);
        let message = format!("0x{}", hex::encode(challenge));

        let signature = self.sign_message(index, &message)?;
        let recovered = recover_personal_signer(&challenge, &signature)?;
        let recovered = format!("0x{}", hex::encode(recovered));

        Ok(recovered.eq_ignore_ascii_case(claimed.trim()))
    }
}

/// Recover the address that produced an EIP-191 signature over `message`.
///
/// The signature must be exactly 65 bytes; recovery ids of 0/1 are accepted
/// and treated as 27/28.
pub fn recover_personal_signer(message: &[u8], signature: &str) -> Result<Address> {
    let trimmed = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(trimmed)
        .map_err(|e| Error::Signing(format!("Invalid signature hex: {}", e)))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(Error::MalformedSignature(bytes.len()));
    }

    let v = match bytes[64] {
        v @ (0 | 1) => v + 27,
        v => v,
    };
    let parity = match v {
        27 => false,
        28 => true,
        other => {
            return Err(Error::Signing(format!("Unsupported recovery id: {}", other)));
        }
    };

    Signature::from_bytes_and_parity(&bytes[..64], parity)
        .recover_address_from_msg(message)
        .map_err(|e| Error::Signing(e.to_string()))
}

pub(crate) fn message_bytes(message: &str) -> Vec<u8> {
    message
        .strip_prefix("0x")
        .and_then(|hex_body| hex::decode(hex_body).ok())
        .unwrap_or_else(|| message.as_bytes().to_vec())
}

fn encode_signature(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.as_bytes()))
}

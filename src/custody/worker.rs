//! Key custody worker.
//!
//! Owns the decrypted keyring while unlocked. Requests are handled one at a
//! time; each produces exactly one [`Response`].

use crate::config::KdfParams;
use crate::custody::protocol::{
    AddKeyParams, Message, Method, RemoveKeyParams, Request, Response, UnlockParams,
};
use crate::keyring::{parse_key, Keyring, SigningExecutor};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info, warn};

pub struct KeyCustodyWorker {
    token: SecretString,
    keyring: Option<Keyring>,
    kdf: KdfParams,
}

impl KeyCustodyWorker {
    /// Create a locked worker that accepts messages presenting `token`.
    pub fn new(token: SecretString, kdf: KdfParams) -> Self {
        Self {
            token,
            keyring: None,
            kdf,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.keyring.is_some()
    }

    /// Authenticate, decode and execute one message.
    pub fn handle_message(&mut self, message: Message) -> Response {
        let Message {
            id,
            method,
            params,
            token,
        } = message;

        if !tokens_match(token.as_bytes(), self.token.expose_secret().as_bytes()) {
            warn!(id = %id, method = %method, "Rejected message with invalid token");
            return Response::failure(id, &Error::InvalidToken);
        }

        let result = method
            .parse::<Method>()
            .and_then(|method| Request::parse(method, params))
            .and_then(|request| self.dispatch(request));

        match result {
            Ok(value) => {
                debug!(id = %id, method = %method, "Handled custody request");
                Response::success(id, value)
            }
            Err(e) => {
                debug!(id = %id, method = %method, code = e.code(), "Custody request failed");
                Response::failure(id, &e)
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Value> {
        match request {
            Request::Unlock(params) => {
                self.unlock(params)?;
                Ok(Value::Null)
            }
            Request::Lock => {
                self.lock();
                Ok(Value::Null)
            }
            Request::AddKey(params) => self.add_key(params).map(Value::String),
            Request::RemoveKey(params) => Ok(self
                .remove_key(params)?
                .map(Value::String)
                .unwrap_or(Value::Null)),
            Request::SignMessage(params) => self
                .executor()?
                .sign_message(params.index, &params.message)
                .map(Value::String),
            Request::SignTypedData(params) => self
                .executor()?
                .sign_typed_data(params.index, &params.typed_message)
                .map(Value::String),
            Request::SignTransaction(params) => self
                .executor()?
                .sign_transaction(params.index, params.raw_tx)
                .map(Value::String),
            Request::VerifyAddress(params) => self
                .executor()?
                .verify_address(params.index, &params.address)
                .map(Value::Bool),
        }
    }

    fn unlock(&mut self, params: UnlockParams) -> Result<()> {
        // Only replace the keyring once decryption has fully succeeded
        let keyring = Keyring::decrypt(&params.encrypted_keys, params.password.secret())?;
        info!(keys = keyring.len(), "Signer unlocked");
        self.keyring = Some(keyring);
        Ok(())
    }

    fn lock(&mut self) {
        if self.keyring.take().is_some() {
            info!("Signer locked");
        }
    }

    fn add_key(&self, params: AddKeyParams) -> Result<String> {
        let password = params.password.secret();
        let mut keyring = match non_empty(params.encrypted_keys) {
            Some(blob) => Keyring::decrypt(&blob, password)?,
            None => Keyring::new(),
        };
        keyring.push(parse_key(&params.key)?);
        keyring.encrypt(password, &self.kdf)
    }

    fn remove_key(&self, params: RemoveKeyParams) -> Result<Option<String>> {
        let blob = non_empty(params.encrypted_keys).ok_or(Error::NoKeys)?;
        let password = params.password.secret();
        let mut keyring = Keyring::decrypt(&blob, password)?;
        keyring.remove(params.index)?;
        if keyring.is_empty() {
            return Ok(None);
        }
        keyring.encrypt(password, &self.kdf).map(Some)
    }

    fn executor(&self) -> Result<SigningExecutor<'_, Keyring>> {
        self.keyring
            .as_ref()
            .map(SigningExecutor::new)
            .ok_or(Error::SignerLocked)
    }
}

fn non_empty(blob: Option<String>) -> Option<String> {
    blob.filter(|b| !b.trim().is_empty())
}

/// Constant-time comparison so token checks do not leak a matching prefix.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in presented.iter().zip(expected.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::tests::{password, ADDRESS_0, ADDRESS_1, KEY_0, KEY_1};
    use serde_json::json;

    const TOKEN: &str = "5f0c3ad1b7e24c0a9d6e8f71a2b4c6d8";

    fn worker() -> KeyCustodyWorker {
        KeyCustodyWorker::new(password(TOKEN), KdfParams::fast())
    }

    fn call(worker: &mut KeyCustodyWorker, method: &str, params: Value) -> Result<Value> {
        call_with_token(worker, method, params, TOKEN)
    }

    fn call_with_token(
        worker: &mut KeyCustodyWorker,
        method: &str,
        params: Value,
        token: &str,
    ) -> Result<Value> {
        let response = worker.handle_message(Message {
            id: "req-1".to_string(),
            method: method.to_string(),
            params,
            token: token.to_string(),
        });
        assert_eq!(response.id, "req-1");
        response.into_result()
    }

    fn blob_with(worker: &mut KeyCustodyWorker, keys: &[&str], pw: &str) -> String {
        let mut blob: Option<String> = None;
        for key in keys {
            let value = call(
                worker,
                "addKey",
                json!({ "encryptedKeys": blob, "key": key, "password": pw }),
            )
            .unwrap();
            blob = Some(value.as_str().unwrap().to_string());
        }
        blob.unwrap()
    }

    fn addresses(blob: &str, pw: &str) -> Vec<String> {
        Keyring::decrypt(blob, &password(pw))
            .unwrap()
            .addresses()
            .unwrap()
            .iter()
            .map(|a| format!("0x{}", hex::encode(a)))
            .collect()
    }

    #[test]
    fn starts_locked() {
        assert!(!worker().is_unlocked());
    }

    #[test]
    fn wrong_password_leaves_worker_locked_and_unpoisoned() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "correct");

        for wrong in ["", "Correct", "correct ", "hunter2"] {
            let err = call(
                &mut worker,
                "unlock",
                json!({ "encryptedKeys": blob, "password": wrong }),
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidPassword));
            assert!(!worker.is_unlocked());
        }

        call(
            &mut worker,
            "unlock",
            json!({ "encryptedKeys": blob, "password": "correct" }),
        )
        .unwrap();
        assert!(worker.is_unlocked());
    }

    #[test]
    fn failed_unlock_keeps_existing_keyring() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "correct");
        call(
            &mut worker,
            "unlock",
            json!({ "encryptedKeys": blob, "password": "correct" }),
        )
        .unwrap();

        let err = call(
            &mut worker,
            "unlock",
            json!({ "encryptedKeys": blob, "password": "wrong" }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPassword));
        assert!(worker.is_unlocked());
    }

    #[test]
    fn signing_after_lock_is_signer_locked() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "pw");
        call(&mut worker, "unlock", json!({ "encryptedKeys": blob, "password": "pw" })).unwrap();
        call(&mut worker, "signMessage", json!({ "index": 0, "message": "hi" })).unwrap();

        call(&mut worker, "lock", Value::Null).unwrap();
        assert!(!worker.is_unlocked());

        let attempts = [
            ("signMessage", json!({ "index": 0, "message": "hi" })),
            (
                "signTypedData",
                json!({ "index": 0, "typedMessage": {
                    "types": {
                        "EIP712Domain": [{ "name": "name", "type": "string" }],
                        "Greeting": [{ "name": "text", "type": "string" }]
                    },
                    "primaryType": "Greeting",
                    "domain": { "name": "ring-signer" },
                    "message": { "text": "hi" }
                }}),
            ),
            ("signTransaction", json!({ "index": 0, "rawTx": {} })),
            ("verifyAddress", json!({ "index": 0, "address": ADDRESS_0 })),
        ];
        for (method, params) in attempts {
            let err = call(&mut worker, method, params).unwrap_err();
            assert!(matches!(err, Error::SignerLocked), "{method}: {err}");
        }
    }

    #[test]
    fn lock_always_succeeds() {
        let mut worker = worker();
        assert_eq!(call(&mut worker, "lock", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn add_then_remove_restores_key_set() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "pw");

        let grown = call(
            &mut worker,
            "addKey",
            json!({ "encryptedKeys": blob, "key": KEY_1, "password": "pw" }),
        )
        .unwrap();
        let grown = grown.as_str().unwrap();
        assert_eq!(addresses(grown, "pw"), vec![ADDRESS_0, ADDRESS_1]);

        let shrunk = call(
            &mut worker,
            "removeKey",
            json!({ "encryptedKeys": grown, "index": 1, "password": "pw" }),
        )
        .unwrap();
        assert_eq!(addresses(shrunk.as_str().unwrap(), "pw"), vec![ADDRESS_0]);
    }

    #[test]
    fn add_key_with_wrong_password_fails() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "pw");
        let err = call(
            &mut worker,
            "addKey",
            json!({ "encryptedKeys": blob, "key": KEY_1, "password": "nope" }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPassword));
    }

    #[test]
    fn add_key_rejects_invalid_key() {
        let mut worker = worker();
        let err = call(
            &mut worker,
            "addKey",
            json!({ "key": "0x1234", "password": "pw" }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn removing_last_key_returns_no_blob() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "pw");
        let result = call(
            &mut worker,
            "removeKey",
            json!({ "encryptedKeys": blob, "index": 0, "password": "pw" }),
        )
        .unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn remove_key_without_blob_is_no_keys() {
        let mut worker = worker();
        for blob in [Value::Null, json!("")] {
            let err = call(
                &mut worker,
                "removeKey",
                json!({ "encryptedKeys": blob, "index": 0, "password": "pw" }),
            )
            .unwrap_err();
            assert!(matches!(err, Error::NoKeys));
        }
    }

    #[test]
    fn remove_key_drops_only_the_indexed_duplicate() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0, KEY_1, KEY_0], "pw");
        let shrunk = call(
            &mut worker,
            "removeKey",
            json!({ "encryptedKeys": blob, "index": 2, "password": "pw" }),
        )
        .unwrap();
        assert_eq!(
            addresses(shrunk.as_str().unwrap(), "pw"),
            vec![ADDRESS_0, ADDRESS_1]
        );
    }

    #[test]
    fn verify_address_distinguishes_keys() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0, KEY_1], "pw");
        call(&mut worker, "unlock", json!({ "encryptedKeys": blob, "password": "pw" })).unwrap();

        let verify = |worker: &mut KeyCustodyWorker, index: usize, address: &str| {
            call(worker, "verifyAddress", json!({ "index": index, "address": address }))
                .unwrap()
                .as_bool()
                .unwrap()
        };
        assert!(verify(&mut worker, 0, ADDRESS_0));
        assert!(verify(&mut worker, 1, ADDRESS_1));
        assert!(!verify(&mut worker, 0, ADDRESS_1));
        assert!(!verify(&mut worker, 1, ADDRESS_0));
    }

    #[test]
    fn invalid_token_rejected_for_every_method() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "pw");
        let forged = "5f0c3ad1b7e24c0a9d6e8f71a2b4c6d9";

        let mut methods: Vec<&str> = Method::ALL.iter().map(|m| m.as_str()).collect();
        methods.push("exportKeys");
        for method in methods {
            let err = call_with_token(
                &mut worker,
                method,
                json!({ "encryptedKeys": blob, "password": "pw", "index": 0, "message": "x" }),
                forged,
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidToken), "{method}");
            assert!(!worker.is_unlocked());
        }
    }

    #[test]
    fn invalid_token_does_not_lock_an_unlocked_worker() {
        let mut worker = worker();
        let blob = blob_with(&mut worker, &[KEY_0], "pw");
        call(&mut worker, "unlock", json!({ "encryptedKeys": blob, "password": "pw" })).unwrap();

        let err = call_with_token(&mut worker, "lock", Value::Null, "short").unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
        assert!(worker.is_unlocked());
    }

    #[test]
    fn unknown_method_is_invalid_method() {
        let mut worker = worker();
        let err = call(&mut worker, "exportKeys", Value::Null).unwrap_err();
        assert!(matches!(err, Error::InvalidMethod(_)));
        assert!(!worker.is_unlocked());
    }

    #[test]
    fn tokens_match_is_exact() {
        assert!(tokens_match(b"hello", b"hello"));
        assert!(!tokens_match(b"hello", b"world"));
        assert!(!tokens_match(b"hello", b"hello!"));
        assert!(!tokens_match(b"", b"x"));
    }
}

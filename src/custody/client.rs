//! Caller side of the custody boundary.
//!
//! [`CustodyClient::spawn`] starts the worker on its own thread, hands it a
//! freshly generated token, and keeps that token for itself. Requests and
//! responses cross as [`Message`] and [`Response`] envelopes only; responses
//! are routed back to the waiting caller by `id`.

use crate::backend::SigningBackend;
use crate::config::CustodyConfig;
use crate::custody::protocol::{
    AddKeyParams, Message, Password, RemoveKeyParams, Request, Response, SignMessageParams,
    SignTransactionParams, SignTypedDataParams, UnlockParams, VerifyAddressParams,
};
use crate::custody::worker::KeyCustodyWorker;
use crate::{Error, Result};
use alloy::dyn_abi::TypedData;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

/// Handle to a running key custody worker.
pub struct CustodyClient {
    token: SecretString,
    requests: Option<mpsc::Sender<Message>>,
    pending: PendingMap,
    worker: Option<JoinHandle<()>>,
}

impl CustodyClient {
    /// Start a worker thread and the response router.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: &CustodyConfig) -> Result<Self> {
        let token = generate_token();
        let worker_token = SecretString::from(token.expose_secret().to_string());
        let kdf = config.kdf;

        let (request_tx, mut request_rx) = mpsc::channel::<Message>(config.channel_capacity);
        let (response_tx, response_rx) = mpsc::channel::<Response>(config.channel_capacity);

        let worker = std::thread::Builder::new()
            .name("key-custody".to_string())
            .spawn(move || {
                let mut worker = KeyCustodyWorker::new(worker_token, kdf);
                while let Some(message) = request_rx.blocking_recv() {
                    let response = worker.handle_message(message);
                    if response_tx.blocking_send(response).is_err() {
                        break;
                    }
                }
                debug!("Key custody worker stopped");
            })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(route_responses(response_rx, pending.clone()));

        Ok(Self {
            token,
            requests: Some(request_tx),
            pending,
            worker: Some(worker),
        })
    }

    /// Send a raw envelope and wait for its response.
    pub async fn send(&self, message: Message) -> Result<Response> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Channel("custody worker has been shut down".to_string()))?;

        let id = message.id.clone();
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::Channel(format!("Request id already pending: {}", id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        if requests.send(message).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::Channel("custody worker has stopped".to_string()));
        }

        rx.await
            .map_err(|_| Error::Channel("custody worker dropped the request".to_string()))
    }

    /// Send a typed request with this client's token.
    pub async fn request(&self, request: Request) -> Result<Value> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            method: request.method().as_str().to_string(),
            params: request.to_params()?,
            token: self.token.expose_secret().to_string(),
        };
        self.send(message).await?.into_result()
    }

    pub async fn unlock(&self, encrypted_keys: &str, password: SecretString) -> Result<()> {
        self.request(Request::Unlock(UnlockParams {
            encrypted_keys: encrypted_keys.to_string(),
            password: Password::from(password),
        }))
        .await
        .map(|_| ())
    }

    pub async fn lock(&self) -> Result<()> {
        self.request(Request::Lock).await.map(|_| ())
    }

    /// Append `key` to the keyring in `encrypted_keys` (or start a new one),
    /// returning the new blob.
    pub async fn add_key(
        &self,
        encrypted_keys: Option<&str>,
        key: &str,
        password: SecretString,
    ) -> Result<String> {
        let value = self
            .request(Request::AddKey(AddKeyParams {
                encrypted_keys: encrypted_keys.map(str::to_string),
                key: key.to_string(),
                password: Password::from(password),
            }))
            .await?;
        expect_string(value)
    }

    /// Remove the key at `index`; `None` when no keys remain.
    pub async fn remove_key(
        &self,
        encrypted_keys: Option<&str>,
        index: usize,
        password: SecretString,
    ) -> Result<Option<String>> {
        let value = self
            .request(Request::RemoveKey(RemoveKeyParams {
                encrypted_keys: encrypted_keys.map(str::to_string),
                index,
                password: Password::from(password),
            }))
            .await?;
        match value {
            Value::Null => Ok(None),
            other => expect_string(other).map(Some),
        }
    }

    pub async fn sign_message(&self, index: usize, message: &str) -> Result<String> {
        let value = self
            .request(Request::SignMessage(SignMessageParams {
                index,
                message: message.to_string(),
            }))
            .await?;
        expect_string(value)
    }

    pub async fn sign_typed_data(&self, index: usize, typed_message: TypedData) -> Result<String> {
        let value = self
            .request(Request::SignTypedData(SignTypedDataParams {
                index,
                typed_message,
            }))
            .await?;
        expect_string(value)
    }

    pub async fn sign_transaction(&self, index: usize, raw_tx: TransactionRequest) -> Result<String> {
        let value = self
            .request(Request::SignTransaction(SignTransactionParams { index, raw_tx }))
            .await?;
        expect_string(value)
    }

    pub async fn verify_address(&self, index: usize, address: &str) -> Result<bool> {
        let value = self
            .request(Request::VerifyAddress(VerifyAddressParams {
                index,
                address: address.to_string(),
            }))
            .await?;
        value
            .as_bool()
            .ok_or_else(|| Error::Channel(format!("Unexpected verifyAddress result: {}", value)))
    }

    /// Close the channel and wait for the worker thread to drop its keyring.
    pub async fn shutdown(mut self) -> Result<()> {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|e| Error::Channel(e.to_string()))?
                .map_err(|_| Error::Channel("custody worker panicked".to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SigningBackend for CustodyClient {
    async fn sign_message(&self, index: usize, message: &str) -> Result<String> {
        CustodyClient::sign_message(self, index, message).await
    }

    async fn verify_address(&self, index: usize, address: &str) -> Result<bool> {
        CustodyClient::verify_address(self, index, address).await
    }
}

impl std::fmt::Debug for CustodyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyClient")
            .field("token", &"[REDACTED]")
            .field("running", &self.requests.is_some())
            .finish()
    }
}

async fn route_responses(mut responses: mpsc::Receiver<Response>, pending: PendingMap) {
    while let Some(response) = responses.recv().await {
        match pending.lock().await.remove(&response.id) {
            Some(waiter) => {
                // The caller may have given up; nothing else to do then
                let _ = waiter.send(response);
            }
            None => warn!(id = %response.id, "Dropping response with no pending request"),
        }
    }
    // Worker gone: wake every remaining caller with a channel error
    pending.lock().await.clear();
}

fn generate_token() -> SecretString {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    SecretString::from(hex::encode(bytes))
}

fn expect_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::Channel(format!("Unexpected result: {}", other))),
    }
}

//! Hardware signing through the command queue.
//!
//! A device handles one request at a time, so every call is wrapped in a
//! [`DeviceCommand`] and serialized by a [`CommandQueue`]. Keys never leave
//! the device; only signatures come back.

use crate::backend::SigningBackend;
use crate::keyring::{message_bytes, recover_personal_signer};
use crate::queue::{CommandQueue, CommandReceipt, DeviceCommand};
use crate::Result;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const SIGN_MESSAGE: &str = "signMessage";
const DEVICE_STATUS: &str = "deviceStatus";

/// Connection state reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceStatus {
    Ready,
    /// Connected but waiting for a PIN or app
    Locked,
    Disconnected,
}

/// Raw channel to a hardware signer.
///
/// Implementations may assume calls never overlap.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    /// Produce a 65-byte EIP-191 signature over `message`, hex encoded.
    async fn sign_message(&self, index: usize, message: &[u8]) -> Result<String>;

    async fn status(&self) -> Result<DeviceStatus>;
}

/// [`SigningBackend`] for keys held on a hardware device.
pub struct DeviceSigner<T> {
    transport: Arc<T>,
    queue: CommandQueue,
}

impl<T: DeviceTransport> DeviceSigner<T> {
    /// The queue is not started here; callers own its lifecycle.
    pub fn new(transport: T, queue: CommandQueue) -> Self {
        Self {
            transport: Arc::new(transport),
            queue,
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub async fn sign_message(&self, index: usize, message: &str) -> Result<String> {
        let payload = message_bytes(message);
        let transport = self.transport.clone();
        let (command, receipt) = DeviceCommand::new(SIGN_MESSAGE, async move {
            transport.sign_message(index, &payload).await
        });
        self.queue.submit(command);
        receipt.outcome().await
    }

    /// Sign a random challenge on the device and compare the recovered
    /// signer with `claimed`, ignoring case.
    pub async fn verify_address(&self, index: usize, claimed: &str) -> Result<bool> {
        let mut challenge = [0u8; 32];
        OsRng.fill_bytes(&mut challenge);

        let signature = self
            .sign_message(index, &format!("0x{}", hex::encode(challenge)))
            .await?;
        let recovered = recover_personal_signer(&challenge, &signature)?;
        let recovered = format!("0x{}", hex::encode(recovered));

        Ok(recovered.eq_ignore_ascii_case(claimed.trim()))
    }

    /// Queue a status probe unless one is already waiting at the tail.
    pub fn refresh_status(&self) -> Option<CommandReceipt<DeviceStatus>> {
        if self
            .queue
            .peek_last(|command| command.kind() == DEVICE_STATUS)
            .unwrap_or(false)
        {
            debug!("Status probe already queued");
            return None;
        }

        let transport = self.transport.clone();
        let (command, receipt) =
            DeviceCommand::new(DEVICE_STATUS, async move { transport.status().await });
        self.queue.submit(command);
        Some(receipt)
    }
}

#[async_trait]
impl<T: DeviceTransport> SigningBackend for DeviceSigner<T> {
    async fn sign_message(&self, index: usize, message: &str) -> Result<String> {
        DeviceSigner::sign_message(self, index, message).await
    }

    async fn verify_address(&self, index: usize, address: &str) -> Result<bool> {
        DeviceSigner::verify_address(self, index, address).await
    }
}

impl<T> std::fmt::Debug for DeviceSigner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSigner")
            .field("queue", &self.queue)
            .finish()
    }
}

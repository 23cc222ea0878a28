//! Ring Signer
//!
//! Key custody and signing for a multi-account wallet:
//! - Encrypted keyring blobs (Argon2id + ChaCha20-Poly1305)
//! - An isolated custody worker reachable only through token-authenticated messages
//! - A FIFO command queue serializing calls to a hardware signer
//!
//! # Security Model
//!
//! - Raw keys exist only inside the custody worker thread
//! - Callers hold encrypted blobs, signatures and addresses, never keys
//! - Passwords and tokens are wrapped in `secrecy` types and redacted from logs
//! - Every message to the worker carries the token minted at spawn time

pub mod backend;
pub mod config;
pub mod custody;
pub mod device;
pub mod keyring;
pub mod queue;

mod error;

// Re-export commonly used types
pub use backend::SigningBackend;
pub use config::{Config, CustodyConfig, KdfParams, QueueConfig, PASSWORD_ENV};
pub use custody::{CustodyClient, KeyCustodyWorker, Message, Method, Request, Response};
pub use device::{DeviceSigner, DeviceStatus, DeviceTransport};
pub use error::{Error, ErrorPayload, Result};
pub use keyring::Keyring;
pub use queue::{Command, CommandQueue, CommandReceipt, DeviceCommand};

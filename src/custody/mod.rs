//! Key custody worker and its message channel
//!
//! The worker runs on a dedicated thread and is only reachable through
//! token-authenticated [`Message`] envelopes. It never hands out key
//! material: callers see encrypted blobs, signatures and booleans.

mod client;
mod protocol;
mod worker;

pub use client::CustodyClient;
pub use protocol::{
    AddKeyParams, Message, Method, Password, RemoveKeyParams, Request, Response, ResponseKind,
    SignMessageParams, SignTransactionParams, SignTypedDataParams, UnlockParams,
    VerifyAddressParams,
};
pub use worker::KeyCustodyWorker;

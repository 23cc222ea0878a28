//! Error types for the ring signer

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid method: '{0}'")]
    InvalidMethod(String),

    #[error("Signer locked")]
    SignerLocked,

    #[error("Signer does not have any keys")]
    NoKeys,

    #[error("No key at index {0}")]
    KeyNotFound(usize),

    #[error("verifyAddress signature has incorrect length: expected 65 bytes, got {0}")]
    MalformedSignature(usize),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Command aborted: {0}")]
    Aborted(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Custody channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable identifier carried in responses across the custody channel.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidPassword => "InvalidPassword",
            Error::InvalidToken => "InvalidToken",
            Error::InvalidMethod(_) => "InvalidMethod",
            Error::SignerLocked => "SignerLocked",
            Error::NoKeys => "NoKeys",
            Error::KeyNotFound(_) => "KeyNotFound",
            Error::MalformedSignature(_) => "MalformedSignature",
            Error::Transport(_) => "TransportError",
            Error::Aborted(_) => "Aborted",
            Error::InvalidParams(_) | Error::Json(_) => "InvalidParams",
            Error::InvalidKey(_) => "InvalidKey",
            Error::Signing(_) | Error::Crypto(_) => "Signing",
            Error::Channel(_) | Error::Io(_) => "Channel",
            Error::Config(_) => "Config",
        }
    }
}

/// Error as it travels inside a [`crate::custody::Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    /// Key index or signature length, for the variants that carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<usize>,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        let detail = match err {
            Error::KeyNotFound(index) => Some(*index),
            Error::MalformedSignature(len) => Some(*len),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            detail,
        }
    }
}

impl From<ErrorPayload> for Error {
    fn from(payload: ErrorPayload) -> Self {
        match payload.code.as_str() {
            "InvalidPassword" => Error::InvalidPassword,
            "InvalidToken" => Error::InvalidToken,
            "SignerLocked" => Error::SignerLocked,
            "NoKeys" => Error::NoKeys,
            "InvalidMethod" => Error::InvalidMethod(payload.message),
            "KeyNotFound" => Error::KeyNotFound(payload.detail.unwrap_or_default()),
            "MalformedSignature" => Error::MalformedSignature(payload.detail.unwrap_or_default()),
            "TransportError" => Error::Transport(payload.message),
            "Aborted" => Error::Aborted(payload.message),
            "InvalidParams" => Error::InvalidParams(payload.message),
            "InvalidKey" => Error::InvalidKey(payload.message),
            "Config" => Error::Config(payload.message),
            "Channel" => Error::Channel(payload.message),
            _ => Error::Signing(format!("{}: {}", payload.code, payload.message)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

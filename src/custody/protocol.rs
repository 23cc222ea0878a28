//! Message envelopes for the custody channel.
//!
//! Every request is a [`Message`] carrying the shared token; every reply is a
//! [`Response`] carrying the same `id`. Only these envelopes cross the
//! boundary between the caller and the custody worker.

use crate::error::ErrorPayload;
use crate::{Error, Result};
use alloy::dyn_abi::TypedData;
use alloy::rpc::types::TransactionRequest;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Inbound command envelope.
#[derive(Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub token: String,
}

// Params may hold passwords and the token is a secret
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("params", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Rpc,
}

/// Reply to exactly one [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub error: Option<ErrorPayload>,
    pub result: Option<Value>,
    pub kind: ResponseKind,
}

impl Response {
    pub fn success(id: String, result: Value) -> Self {
        Self {
            id,
            error: None,
            result: Some(result),
            kind: ResponseKind::Rpc,
        }
    }

    pub fn failure(id: String, error: &Error) -> Self {
        Self {
            id,
            error: Some(ErrorPayload::from(error)),
            result: None,
            kind: ResponseKind::Rpc,
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(payload) => Err(Error::from(payload)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Commands understood by the custody worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Unlock,
    Lock,
    AddKey,
    RemoveKey,
    SignMessage,
    SignTypedData,
    SignTransaction,
    VerifyAddress,
}

impl Method {
    #[cfg(test)]
    pub(crate) const ALL: [Method; 8] = [
        Method::Unlock,
        Method::Lock,
        Method::AddKey,
        Method::RemoveKey,
        Method::SignMessage,
        Method::SignTypedData,
        Method::SignTransaction,
        Method::VerifyAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Unlock => "unlock",
            Method::Lock => "lock",
            Method::AddKey => "addKey",
            Method::RemoveKey => "removeKey",
            Method::SignMessage => "signMessage",
            Method::SignTypedData => "signTypedData",
            Method::SignTransaction => "signTransaction",
            Method::VerifyAddress => "verifyAddress",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "unlock" => Method::Unlock,
            "lock" => Method::Lock,
            "addKey" => Method::AddKey,
            "removeKey" => Method::RemoveKey,
            "signMessage" => Method::SignMessage,
            "signTypedData" => Method::SignTypedData,
            "signTransaction" => Method::SignTransaction,
            "verifyAddress" => Method::VerifyAddress,
            other => return Err(Error::InvalidMethod(other.to_string())),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyring password as carried in params. Never printed.
pub struct Password(SecretString);

impl Password {
    pub fn secret(&self) -> &SecretString {
        &self.0
    }
}

impl From<SecretString> for Password {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl Serialize for Password {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self(SecretString::from(s)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockParams {
    pub encrypted_keys: String,
    pub password: Password,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddKeyParams {
    pub encrypted_keys: Option<String>,
    pub key: String,
    pub password: Password,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveKeyParams {
    pub encrypted_keys: Option<String>,
    pub index: usize,
    pub password: Password,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignMessageParams {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTypedDataParams {
    pub index: usize,
    pub typed_message: TypedData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionParams {
    pub index: usize,
    pub raw_tx: TransactionRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyAddressParams {
    pub index: usize,
    pub address: String,
}

/// A decoded command with typed params.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Request {
    Unlock(UnlockParams),
    Lock,
    AddKey(AddKeyParams),
    RemoveKey(RemoveKeyParams),
    SignMessage(SignMessageParams),
    SignTypedData(SignTypedDataParams),
    SignTransaction(SignTransactionParams),
    VerifyAddress(VerifyAddressParams),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Unlock(_) => Method::Unlock,
            Request::Lock => Method::Lock,
            Request::AddKey(_) => Method::AddKey,
            Request::RemoveKey(_) => Method::RemoveKey,
            Request::SignMessage(_) => Method::SignMessage,
            Request::SignTypedData(_) => Method::SignTypedData,
            Request::SignTransaction(_) => Method::SignTransaction,
            Request::VerifyAddress(_) => Method::VerifyAddress,
        }
    }

    /// Decode `params` for `method`.
    pub fn parse(method: Method, params: Value) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(method: Method, params: Value) -> Result<T> {
            serde_json::from_value(params)
                .map_err(|e| Error::InvalidParams(format!("{}: {}", method, e)))
        }

        Ok(match method {
            Method::Unlock => Request::Unlock(decode(method, params)?),
            Method::Lock => Request::Lock,
            Method::AddKey => Request::AddKey(decode(method, params)?),
            Method::RemoveKey => Request::RemoveKey(decode(method, params)?),
            Method::SignMessage => Request::SignMessage(decode(method, params)?),
            Method::SignTypedData => Request::SignTypedData(decode(method, params)?),
            Method::SignTransaction => Request::SignTransaction(decode(method, params)?),
            Method::VerifyAddress => Request::VerifyAddress(decode(method, params)?),
        })
    }

    /// Encode the params half of the envelope; `lock` carries `null`.
    pub fn to_params(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert!(matches!(
            "exportKeys".parse::<Method>(),
            Err(Error::InvalidMethod(name)) if name == "exportKeys"
        ));
    }

    #[test]
    fn response_serializes_with_rpc_kind() {
        let value = serde_json::to_value(Response::success("1".into(), json!("0xabc"))).unwrap();
        assert_eq!(value["kind"], "rpc");
        assert_eq!(value["result"], "0xabc");
        assert!(value["error"].is_null());
    }

    #[test]
    fn failure_carries_error_code() {
        let response = Response::failure("7".into(), &Error::SignerLocked);
        assert_eq!(response.error.as_ref().unwrap().code, "SignerLocked");
        assert!(matches!(response.into_result(), Err(Error::SignerLocked)));
    }

    #[test]
    fn to_params_encodes_only_the_params() {
        assert_eq!(Request::Lock.to_params().unwrap(), Value::Null);

        let params = Request::SignMessage(SignMessageParams {
            index: 2,
            message: "hi".to_string(),
        })
        .to_params()
        .unwrap();
        assert_eq!(params, json!({ "index": 2, "message": "hi" }));
        assert!(matches!(
            Request::parse(Method::SignMessage, params).unwrap(),
            Request::SignMessage(SignMessageParams { index: 2, .. })
        ));
    }

    #[test]
    fn parse_reports_bad_params() {
        let err = Request::parse(Method::SignMessage, json!({ "index": "zero" })).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn debug_hides_password() {
        let request = Request::parse(
            Method::Unlock,
            json!({ "encryptedKeys": "00", "password": "correct horse" }),
        )
        .unwrap();
        assert!(!format!("{:?}", request).contains("correct horse"));
    }

    #[test]
    fn add_key_params_allow_missing_blob() {
        let request = Request::parse(
            Method::AddKey,
            json!({ "key": "0x01", "password": "pw" }),
        )
        .unwrap();
        match request {
            Request::AddKey(params) => assert!(params.encrypted_keys.is_none()),
            other => panic!("Expected AddKey, got {:?}", other),
        }
    }
}

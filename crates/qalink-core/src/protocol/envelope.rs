//! The response envelope every server reply is decoded into.
//!
//! ```json
//! {"status":"success","message":"Login successful","username":"ada","request_id":4}
//! {"status":"error","message":"Invalid email or password"}
//! {"status":"success","data":[{"id":"q1","title":"..."}]}
//! ```
//!
//! `status` is always present.  `message`, `data`, and `request_id` are
//! optional.  Any further fields the server adds (e.g. `username`,
//! `lastModified`) are kept in [`ResponseEnvelope::extra`] rather than being
//! silently dropped.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::ids::RequestId;

/// Outcome reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseStatus {
    Success,
    Error,
    /// A status string this client does not know about.
    Other(String),
}

impl From<String> for ResponseStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => ResponseStatus::Success,
            "error" => ResponseStatus::Error,
            _ => ResponseStatus::Other(s),
        }
    }
}

impl From<ResponseStatus> for String {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Success => "success".to_string(),
            ResponseStatus::Error => "error".to_string(),
            ResponseStatus::Other(s) => s,
        }
    }
}

/// A decoded server reply.
///
/// `T` is the payload type of `data`; it defaults to an untyped JSON value so
/// callers that only care about `status`/`message` need not name one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T = Value> {
    pub status: ResponseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,

    /// Fields not covered above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<T: DeserializeOwned> ResponseEnvelope<T> {
    /// Decodes an envelope from one complete response message.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the bytes are not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl<T> ResponseEnvelope<T> {
    /// `true` when the server reported `"status": "success"`.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Convenience accessor for string-valued extra fields such as `username`.
    pub fn extra_str(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }

    /// Converts into `Ok(data)` on success or `Err(message)` otherwise.
    ///
    /// A failure without a message yields `"unknown error"`.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(self
                .message
                .unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

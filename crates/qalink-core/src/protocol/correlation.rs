//! Matching responses to requests.
//!
//! The byte stream carries no built-in notion of which reply answers which
//! request.  Two strategies are available:
//!
//! - [`CorrelationMode::Fifo`] pairs replies with requests *by position*: the
//!   first reply completes the oldest outstanding request.  This is only
//!   correct if the server answers strictly in order with exactly one reply
//!   per request.  It is what the legacy backend supports.
//! - [`CorrelationMode::Tagged`] writes a `request_id` field into every
//!   request object and expects the server to echo it in the reply.  Replies
//!   can then arrive in any order.
//!
//! ```text
//! request  {"action":"get_questions","request_id":7}
//! response {"status":"success","data":[...],"request_id":7}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::ids::RequestId;

/// Name of the JSON field that carries the correlation id.
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Errors raised while tagging a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// Only JSON objects can carry a `request_id` field.
    #[error("tagged correlation needs a JSON object request, got {0}")]
    NotAnObject(&'static str),

    /// The correlation mode name in a configuration value is not recognised.
    #[error("unknown correlation mode '{0}' (expected fifo or tagged)")]
    UnknownMode(String),
}

/// How inbound messages are paired with pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Position-based pairing; requires in-order, one-reply-per-request servers.
    Fifo,
    /// Id-based pairing through an echoed `request_id` field.
    #[default]
    Tagged,
}

impl fmt::Display for CorrelationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationMode::Fifo => f.write_str("fifo"),
            CorrelationMode::Tagged => f.write_str("tagged"),
        }
    }
}

impl FromStr for CorrelationMode {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(CorrelationMode::Fifo),
            "tagged" | "id" => Ok(CorrelationMode::Tagged),
            other => Err(CorrelationError::UnknownMode(other.to_string())),
        }
    }
}

/// Writes `id` into the request object's `request_id` field.
///
/// An existing `request_id` is overwritten: the id must be the one the client
/// is tracking, not one the caller made up.
///
/// # Errors
///
/// Returns [`CorrelationError::NotAnObject`] if `request` is not a JSON object.
///
/// # Examples
///
/// ```rust
/// use qalink_core::protocol::correlation::tag_request;
/// use qalink_core::protocol::ids::RequestId;
///
/// let mut req = serde_json::json!({"action": "get_questions"});
/// tag_request(&mut req, RequestId(3)).unwrap();
/// assert_eq!(req["request_id"], 3);
/// ```
pub fn tag_request(request: &mut Value, id: RequestId) -> Result<(), CorrelationError> {
    match request {
        Value::Object(map) => {
            map.insert(REQUEST_ID_FIELD.to_string(), Value::from(id.0));
            Ok(())
        }
        other => Err(CorrelationError::NotAnObject(json_type_name(other))),
    }
}

/// Only the correlation field is deserialized; everything else is skipped.
#[derive(Deserialize)]
struct IdProbe {
    #[serde(default)]
    request_id: Option<RequestId>,
}

/// Extracts the echoed `request_id` from a response message, if present.
///
/// Returns `None` if the message is not a JSON object, has no `request_id`, or
/// the field is not an unsigned integer.
pub fn probe_request_id(message: &[u8]) -> Option<RequestId> {
    serde_json::from_slice::<IdProbe>(message)
        .ok()
        .and_then(|probe| probe.request_id)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

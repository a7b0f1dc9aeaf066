//! Error types for the connection and client layers.
//!
//! Both types are `Clone` so one failure can be reported to several observers
//! (the state handler and the termination handler see the same error).

use std::io;
use std::time::Duration;

use qalink_core::FramingError;
use thiserror::Error;

/// Why a single TCP connection ended in the `Failed` state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The TCP handshake was rejected or could not be attempted.
    #[error("failed to connect to {endpoint}: {message}")]
    ConnectFailed {
        endpoint: String,
        kind: io::ErrorKind,
        message: String,
    },

    /// The TCP handshake did not complete within the connect timeout.
    #[error("no connection to {endpoint} within {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// A read on the established stream failed.
    #[error("read failed: {message}")]
    Read { kind: io::ErrorKind, message: String },

    /// A write on the established stream failed.
    #[error("write failed: {message}")]
    Write { kind: io::ErrorKind, message: String },
}

impl ConnectionError {
    pub(crate) fn connect_failed(endpoint: impl ToString, err: &io::Error) -> Self {
        ConnectionError::ConnectFailed {
            endpoint: endpoint.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn read(err: &io::Error) -> Self {
        ConnectionError::Read {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(err: &io::Error) -> Self {
        ConnectionError::Write {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// The I/O error kind behind this failure, if there was one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ConnectionError::ConnectFailed { kind, .. }
            | ConnectionError::Read { kind, .. }
            | ConnectionError::Write { kind, .. } => Some(*kind),
            ConnectionError::ConnectTimeout { .. } => None,
        }
    }
}

/// Errors delivered to request callbacks and returned by client methods.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// No connection exists at the moment the request was issued.
    #[error("No connection available")]
    NotConnected,

    /// The request could not be turned into bytes.
    #[error("failed to serialize request: {0}")]
    Serialize(String),

    /// The encoded request does not fit the configured framing.
    #[error("request cannot be framed: {0}")]
    Framing(#[from] FramingError),

    /// The connection ended while the request was waiting for its reply.
    #[error("connection lost before a response arrived")]
    Disconnected,

    /// No reply arrived within the configured request timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The client was closed.
    #[error("client is closed")]
    Closed,

    /// A reply arrived but could not be decoded as a response envelope.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

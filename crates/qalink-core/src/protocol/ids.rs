//! Identifiers for connections and requests.
//!
//! # Who owns the counter?
//!
//! Every id is handed out by an [`IdSequence`] that has exactly one owner: the
//! client's event loop.  There is no process-wide `static` counter, so two
//! clients in one process never contend on shared state and no atomic is
//! needed.  Ids are only unique within the owning client, which is all the
//! correlation logic requires.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one TCP connection instance within a client.
///
/// A client creates a new connection (and therefore a new id) after every
/// disconnect, so events that carry a stale id can be recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies one outbound request within a client.
///
/// In tagged correlation mode this value is written into the request JSON as
/// `request_id` and must be echoed back by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A monotonically increasing id source with a single owner.
///
/// Connection ids and request ids are drawn from independent counters so that
/// request numbering does not skip when a reconnect happens.
///
/// # Examples
///
/// ```rust
/// use qalink_core::protocol::ids::{ConnectionId, IdSequence, RequestId};
///
/// let mut ids = IdSequence::new();
/// assert_eq!(ids.next_connection(), ConnectionId(0));
/// assert_eq!(ids.next_request(), RequestId(0));
/// assert_eq!(ids.next_request(), RequestId(1));
/// ```
#[derive(Debug, Default)]
pub struct IdSequence {
    next_connection: u64,
    next_request: u64,
}

impl IdSequence {
    /// Creates a sequence whose first connection id and first request id are 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next connection id.  Wraps at `u64::MAX` without panicking.
    pub fn next_connection(&mut self) -> ConnectionId {
        let id = self.next_connection;
        self.next_connection = self.next_connection.wrapping_add(1);
        ConnectionId(id)
    }

    /// Returns the next request id.  Wraps at `u64::MAX` without panicking.
    pub fn next_request(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request = self.next_request.wrapping_add(1);
        RequestId(id)
    }
}

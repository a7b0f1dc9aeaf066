//! Lifecycle states for a single connection and for the client as a whole.

use std::fmt;
use std::time::Duration;

use qalink_core::ConnectionId;

use crate::domain::error::ConnectionError;

/// Lifecycle of one [`Connection`](crate::Connection).
///
/// ```text
/// Setup ──start──► Preparing ──handshake──► Ready
///   │                  │                      │
///   └──────────────────┴──────────────────────┴──► Failed(err) | Cancelled
/// ```
///
/// `Failed` and `Cancelled` are terminal: once entered, the state never changes
/// again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, not started.
    Setup,
    /// TCP handshake in progress.
    Preparing,
    /// Established; reads and writes flow.
    Ready,
    /// Ended because of an error.
    Failed(ConnectionError),
    /// Ended by `stop()` or because the remote side closed the stream.
    Cancelled,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Cancelled)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Setup => f.write_str("setup"),
            ConnectionState::Preparing => f.write_str("preparing"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Failed(err) => write!(f, "failed ({err})"),
            ConnectionState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What the client is doing about its connection right now.
///
/// This is richer than the boolean `connected` flag: it tells an observer
/// whether a reconnect is scheduled and how long until it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Created but `start()` not yet called.
    Idle,
    /// A connection exists and its handshake has not finished.
    Connecting { connection: ConnectionId },
    /// The connection reached `Ready`.
    Ready { connection: ConnectionId },
    /// The last connection ended; attempt number `attempt` starts after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The reconnect policy refused further attempts.
    GaveUp { attempts: u32 },
    /// `close()` was called or every handle was dropped.
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => f.write_str("idle"),
            LinkState::Connecting { connection } => write!(f, "connecting ({connection})"),
            LinkState::Ready { connection } => write!(f, "ready ({connection})"),
            LinkState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {delay:?})")
            }
            LinkState::GaveUp { attempts } => write!(f, "gave up after {attempts} attempts"),
            LinkState::Closed => f.write_str("closed"),
        }
    }
}

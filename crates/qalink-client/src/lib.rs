//! qalink-client library crate.
//!
//! A persistent TCP client for a JSON request/response backend.  The client
//! keeps one connection open, reconnects after it drops, and pairs every
//! inbound reply with the callback of the request it answers.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! caller ── send / request ──► SocketClient (handle, cheap to clone)
//!                                   │ commands (mpsc)
//!                                   ▼
//!                             client actor task ◄── events (mpsc) ── Connection task
//!                               ├── PendingTable                        │
//!                               ├── FrameDecoder                        ▼
//!                               └── ReconnectPolicy                 TcpStream
//! ```
//!
//! - `domain/`          Pure types: configuration, link/connection state, errors
//! - `application/`     Logic with no I/O: pending-request table, reconnect policies
//! - `infrastructure/`
//!     - `connection`     One TCP connection and its lifecycle state machine
//!     - `socket_client`  The reconnecting client and its event loop
//!     - `config_file`    TOML configuration loading
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `qalink-core` only.
//! - `infrastructure` depends on all other layers plus `tokio`.
//!
//! # Example
//!
//! ```rust,no_run
//! use qalink_client::{ClientConfig, SocketClient};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), qalink_client::ClientError> {
//! let client = SocketClient::connect(ClientConfig::default());
//! let reply = client.request(&json!({"action": "get_questions"})).await?;
//! println!("{}", String::from_utf8_lossy(&reply));
//! client.close().await;
//! # Ok(())
//! # }
//! ```

/// Domain layer: configuration, states, and error types (no I/O).
pub mod domain;

/// Application layer: request bookkeeping and reconnect scheduling.
pub mod application;

/// Infrastructure layer: TCP connection, client actor, config file.
pub mod infrastructure;

pub use application::pending::ResponseCallback;
pub use application::reconnect::{ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use domain::config::{ClientConfig, Endpoint, ReconnectConfig};
pub use domain::error::{ClientError, ConnectionError};
pub use domain::state::{ConnectionState, LinkState};
pub use infrastructure::config_file::{load_config, ConfigError, ConfigFile};
pub use infrastructure::connection::Connection;
pub use infrastructure::socket_client::SocketClient;

//! Application layer for the client.
//!
//! The logic here is driven by the client actor but performs no I/O itself,
//! so it is tested with plain `#[test]` functions.

pub mod pending;
pub mod reconnect;

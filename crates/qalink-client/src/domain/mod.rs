//! Domain layer for the client.
//!
//! Contains pure types only: no async, no sockets, no file access.

pub mod config;
pub mod error;
pub mod state;

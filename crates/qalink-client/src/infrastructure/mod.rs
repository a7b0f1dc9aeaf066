//! Infrastructure layer: sockets, the client event loop, and config files.

pub mod config_file;
pub mod connection;
pub mod socket_client;

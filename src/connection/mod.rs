//! Connections
//!
//! Client/server sessions and the per-proxy registry that owns them.

mod connection;
mod manager;

pub use connection::Connection;
pub use manager::ConnectionManager;

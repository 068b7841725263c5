//! Network utility functions
//!
//! This module provides utility functions for network operations.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use log::debug;

use super::error::{ProxyError, Result};

/// Parse a socket address
///
/// Tries a literal `ip:port` first, then falls back to name resolution.
///
/// # Arguments
///
/// * `addr` - The address string to parse
///
/// # Returns
///
/// The parsed `SocketAddr`
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    debug!("Resolving address: {}", addr);
    match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .ok_or_else(|| ProxyError::Network(format!("Address resolved to nothing: {}", addr))),
        Err(e) => Err(ProxyError::Network(format!("Failed to parse address {}: {}", addr, e))),
    }
}

/// Split a `host:port` string into its host part, used for TLS server names
pub fn host_of(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
        None => addr,
    }
}

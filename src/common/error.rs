//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.

use std::io;
use thiserror::Error;

use crate::protocol::http::FramingError;

/// Interception proxy error type
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// TLS handshake error
    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (address resolution, connect timeouts)
    #[error("Network error: {0}")]
    Network(String),

    /// Protocol framing error
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Lifecycle error (start/stop sequencing)
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Invalid operation on a PDU
    #[error("Invalid PDU: {0}")]
    InvalidPdu(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl ProxyError {
    /// Whether this error is an ordinary end of a transport (peer closed, reset, aborted).
    ///
    /// Such errors terminate a connection loop quietly instead of being reported as failures.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;

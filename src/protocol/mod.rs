//! Protocol handling
//!
//! TLS handshake detection for STARTTLS connections and HTTP message framing.

mod detector;
pub mod http;

pub use detector::is_tls_handshake;

//! TLS handshake detection
//!
//! Used by STARTTLS connections to notice the moment a plaintext client starts a TLS
//! handshake. Detection works on bytes already read from the socket; nothing is peeked.

/// TLS handshake record content type
const HANDSHAKE_RECORD: u8 = 0x16;

/// Major version byte shared by SSLv3 and every TLS version
const TLS_MAJOR_VERSION: u8 = 0x03;

/// Returns `true` when `data` starts with a TLS handshake record header
pub fn is_tls_handshake(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == HANDSHAKE_RECORD && data[1] == TLS_MAJOR_VERSION
}

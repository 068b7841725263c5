//! Default configuration values
//!
//! Single source of truth for defaults used by serde and by the CLI.

use super::types::TlsAlgorithm;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "INTERCEPTION_PROXY";

/// Environment variable naming the configuration file
pub const CONFIG_FILE_ENV: &str = "INTERCEPTION_PROXY_CONFIG_FILE";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default proxy code
pub const PROXY_CODE_STR: &str = "tcp";

/// Default listen address as string
pub const LISTEN_STR: &str = "127.0.0.1:8080";

/// Default target address as string
pub const TARGET_STR: &str = "127.0.0.1:80";

/// Default read buffer size in bytes
pub const BUFFER_SIZE: usize = 4096;

/// Default PDU charset
pub const CHARSET_STR: &str = crate::pdu::DEFAULT_CHARSET;

/// Default delay between the first closed side and connection teardown, in milliseconds
pub const CONNECTION_CLOSE_DELAY_MS: u64 = 500;

/// Default target connect timeout in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

pub fn proxy_code() -> String {
    PROXY_CODE_STR.to_string()
}

pub fn listen() -> String {
    LISTEN_STR.to_string()
}

pub fn target() -> String {
    TARGET_STR.to_string()
}

pub fn buffer_size() -> usize {
    BUFFER_SIZE
}

pub fn charset() -> String {
    CHARSET_STR.to_string()
}

pub fn connection_close_delay() -> u64 {
    CONNECTION_CLOSE_DELAY_MS
}

pub fn connect_timeout() -> u64 {
    CONNECT_TIMEOUT_SECS
}

pub fn enabled() -> bool {
    true
}

pub fn tls_algorithm() -> TlsAlgorithm {
    TlsAlgorithm::Tls
}

/// Bytes of payload shown by the log interceptor
pub fn log_preview() -> usize {
    64
}

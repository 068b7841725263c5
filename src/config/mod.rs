//! Configuration module
//!
//! This module handles engine configuration: loading from a JSON file and environment
//! variables, defaults, and validation.

mod defaults;
mod error;
mod loader;
mod types;
mod validator;

pub use self::defaults::{
    BUFFER_SIZE, CONFIG_FILE_ENV, CONNECTION_CLOSE_DELAY_MS, CONNECT_TIMEOUT_SECS, DEFAULT_CONFIG_FILE, ENV_PREFIX,
    LOG_LEVEL_STR,
};
pub use self::error::ConfigError;
pub use self::loader::ConfigLoader;
pub use self::types::{CoreConfig, InterceptorConfig, InterceptorKind, TcpProxyConfig, TlsAlgorithm, TlsSettings};
pub use self::validator::ConfigValidator;

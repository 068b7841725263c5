//! Configuration types

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::ProxyError;

use super::defaults;

/// TLS protocol selection
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum TlsAlgorithm {
    /// Any version the library negotiates
    #[serde(rename = "TLS")]
    Tls,
    /// TLS 1.2 only
    #[serde(rename = "TLSv1.2")]
    TlsV12,
    /// TLS 1.3 only
    #[serde(rename = "TLSv1.3")]
    TlsV13,
}

// Case-insensitive deserialization
impl<'de> Deserialize<'de> for TlsAlgorithm {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TlsAlgorithm::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for TlsAlgorithm {
    fn default() -> Self {
        defaults::tls_algorithm()
    }
}

impl fmt::Display for TlsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => write!(f, "TLS"),
            Self::TlsV12 => write!(f, "TLSv1.2"),
            Self::TlsV13 => write!(f, "TLSv1.3"),
        }
    }
}

impl FromStr for TlsAlgorithm {
    type Err = ProxyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tls" => Ok(Self::Tls),
            "tlsv1.2" => Ok(Self::TlsV12),
            "tlsv1.3" => Ok(Self::TlsV13),
            _ => Err(ProxyError::Config(format!(
                "Invalid TLS algorithm: {}. Valid values are: TLS, TLSv1.2, TLSv1.3",
                s
            ))),
        }
    }
}

/// TLS material and protocol settings for one leg of a proxy
///
/// The identity comes either from a PKCS#12 keystore or from a PEM certificate and key.
/// On the target-facing leg the identity is optional and used as a client certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsSettings {
    /// PKCS#12 keystore path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystore: Option<PathBuf>,

    /// PKCS#12 keystore password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystore_password: Option<String>,

    /// PEM certificate chain path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// PEM private key path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    /// Protocol versions to offer
    pub algorithm: TlsAlgorithm,
}

impl TlsSettings {
    /// Whether any identity material is configured
    pub fn has_identity(&self) -> bool {
        self.keystore.is_some() || self.cert.is_some()
    }
}

/// Configuration of one TCP proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TcpProxyConfig {
    /// Unique proxy code
    pub code: String,

    /// Disabled proxies are not created
    pub enabled: bool,

    /// Listen address (host:port, port 0 picks a free port)
    pub listen: String,

    /// Target server address (host:port)
    pub target: String,

    /// Maximum bytes per read, and so per captured PDU
    pub buffer_size: usize,

    /// Charset stamped on captured PDUs
    pub charset: String,

    /// Delay in milliseconds between the first closed side and connection teardown
    pub connection_close_delay: u64,

    /// Target connect timeout in seconds
    pub connect_timeout: u64,

    /// TLS presented to clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_tls: Option<TlsSettings>,

    /// TLS used towards the target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tls: Option<TlsSettings>,

    /// Start in plaintext and upgrade both legs when the client starts a TLS handshake
    pub starttls: bool,
}

impl Default for TcpProxyConfig {
    fn default() -> Self {
        Self {
            code: defaults::proxy_code(),
            enabled: defaults::enabled(),
            listen: defaults::listen(),
            target: defaults::target(),
            buffer_size: defaults::buffer_size(),
            charset: defaults::charset(),
            connection_close_delay: defaults::connection_close_delay(),
            connect_timeout: defaults::connect_timeout(),
            server_tls: None,
            client_tls: None,
            starttls: false,
        }
    }
}

/// Built-in interceptor behaviours
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InterceptorKind {
    /// Log every PDU
    Log {
        /// Render the preview as hex instead of text
        #[serde(default)]
        hex: bool,
        /// Maximum payload bytes shown
        #[serde(default = "defaults::log_preview")]
        preview: usize,
    },
    /// Tag PDUs containing a pattern
    Tag { tag: String, pattern: String },
    /// Replace every occurrence of a pattern
    Replace { find: String, replace: String },
    /// Drop PDUs carrying a tag or containing a pattern
    Drop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
}

/// Configuration of one pipeline stage; the position is the list position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptorConfig {
    pub code: String,

    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    pub kind: InterceptorKind,
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Proxies to run
    pub proxies: Vec<TcpProxyConfig>,

    /// Client to server pipeline, in order
    pub interceptors_c2s: Vec<InterceptorConfig>,

    /// Server to client pipeline, in order
    pub interceptors_s2c: Vec<InterceptorConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            proxies: Vec::new(),
            interceptors_c2s: Vec::new(),
            interceptors_s2c: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Single plain proxy, optionally logging every PDU in both directions
    ///
    /// # Parameters
    ///
    /// * `listen` - Listen address
    /// * `target` - Target server address
    /// * `buffer_size` - Read buffer size
    /// * `log_pdus` - Add a log interceptor to both pipelines
    pub fn quick(listen: &str, target: &str, buffer_size: usize, log_pdus: bool) -> Self {
        let proxy = TcpProxyConfig {
            listen: listen.to_string(),
            target: target.to_string(),
            buffer_size,
            ..TcpProxyConfig::default()
        };

        let log = |code: &str| InterceptorConfig {
            code: code.to_string(),
            enabled: true,
            kind: InterceptorKind::Log {
                hex: false,
                preview: defaults::log_preview(),
            },
        };

        let (c2s, s2c) = if log_pdus {
            (vec![log("log-c2s")], vec![log("log-s2c")])
        } else {
            (Vec::new(), Vec::new())
        };

        Self {
            proxies: vec![proxy],
            interceptors_c2s: c2s,
            interceptors_s2c: s2c,
            ..Self::default()
        }
    }

    /// Log the configuration
    pub fn log(&self) {
        use log::info;

        if !log::log_enabled!(log::Level::Info) {
            return;
        }

        info!("=== Configuration ===");
        info!("  Log level: {}", self.log_level);
        for proxy in &self.proxies {
            info!(
                "  Proxy {}{}: {} -> {} (buffer {} bytes, charset {}, server TLS: {}, client TLS: {}, STARTTLS: {})",
                proxy.code,
                if proxy.enabled { "" } else { " (disabled)" },
                proxy.listen,
                proxy.target,
                proxy.buffer_size,
                proxy.charset,
                proxy.server_tls.is_some(),
                proxy.client_tls.is_some(),
                proxy.starttls
            );
        }
        for (name, list) in [("C2S", &self.interceptors_c2s), ("S2C", &self.interceptors_s2c)] {
            for (index, interceptor) in list.iter().enumerate() {
                info!(
                    "  {} interceptor #{} {}{}: {:?}",
                    name,
                    index,
                    interceptor.code,
                    if interceptor.enabled { "" } else { " (disabled)" },
                    interceptor.kind
                );
            }
        }
        info!("=====================");
    }
}

//! Interception Proxy: an interactive interception proxy engine
//!
//! The engine sits between a client and a target server, captures every chunk of traffic
//! as a PDU, routes it through an ordered per-direction chain of interceptors and forwards
//! whatever survives to the opposite peer.
//!
//! # Main Features
//!
//! - TCP proxying, plain or with TLS on either leg, including in-place STARTTLS upgrades
//! - Ordered client-to-server and server-to-client interceptor pipelines
//! - All-or-nothing start with full rollback, idempotent stop
//! - HTTP/1.x body framing (content-length and chunked)
//!
//! # Example
//!
//! ```no_run
//! use interception_proxy::config::CoreConfig;
//! use interception_proxy::{Orchestrator, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = CoreConfig::quick("127.0.0.1:8080", "127.0.0.1:80", 4096, true);
//!     let orchestrator = Orchestrator::from_config(&config);
//!
//!     orchestrator.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     orchestrator.stop().await;
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod connection;
pub mod core;
pub mod interceptor;
pub mod interceptors;
pub mod pdu;
pub mod protocol;
pub mod proxy;
pub mod tls;

// Re-export commonly used structures and functions for convenience
pub use crate::core::{CoreHelper, CoreState, Orchestrator};
pub use common::{parse_socket_addr, ProxyError, Result};
pub use interceptor::{Interceptor, InterceptorModule};
pub use pdu::{Pdu, PduDestination};
pub use proxy::{Proxy, ProxyModule};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

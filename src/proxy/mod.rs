//! Proxy module
//!
//! Proxies terminate client connections, connect to the target and feed the captured
//! traffic into the interceptor pipelines.

mod executor;
mod manager;
pub mod tcp;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::common::Result;
use crate::connection::ConnectionManager;
use crate::core::CoreHelper;

pub use executor::ProxyExecutor;
pub use manager::ProxyManager;
pub use tcp::{TcpProxy, TcpProxyModule};

/// Transport worker of one run
///
/// Lifecycle calls run on the blocking pool of the tokio runtime.
pub trait Proxy: Send + Sync {
    /// Code of the module that created this proxy
    fn code(&self) -> &str;

    /// Validate configuration and load resources
    ///
    /// Returning `false` aborts the whole start sequence.
    fn prepare(&self) -> bool;

    /// Begin accepting connections
    fn start(&self) -> bool;

    /// Stop accepting and close every connection
    ///
    /// Must be safe to call whether or not `prepare` or `start` ran.
    fn stop(&self);

    /// Registry of the active connections
    fn connection_manager(&self) -> &Arc<ConnectionManager>;

    /// Address the proxy accepts on, once started
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Factory of proxies, configured once and used for every run
pub trait ProxyModule: Send + Sync {
    fn code(&self) -> &str;

    /// Disabled modules create no proxy
    fn enabled(&self) -> bool {
        true
    }

    /// Create the proxy for one run
    fn create_proxy(&self, helper: &CoreHelper) -> Result<Arc<dyn Proxy>>;
}

//! Common module
//!
//! This module contains shared errors and utility functions used throughout the application.

pub mod error;
pub mod log;
pub mod net;
pub(crate) mod sync;

pub use self::error::{ProxyError, Result};
pub use self::log::init_logger;
pub use self::net::{host_of, parse_socket_addr};

//! Core
//!
//! Lifecycle orchestration tying proxies and interceptor pipelines together.

pub(crate) mod fanout;
mod helper;
mod listener;
mod orchestrator;
mod state;

pub use helper::CoreHelper;
pub use listener::{ConnectionListener, CoreListener, ListenerRegistry};
#[cfg(test)]
pub use listener::{MockConnectionListener, MockCoreListener};
pub use orchestrator::Orchestrator;
pub use state::CoreState;

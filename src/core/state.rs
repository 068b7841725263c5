//! Orchestrator lifecycle state

use std::fmt;

use serde::Serialize;

/// Lifecycle state of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

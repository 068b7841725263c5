//! PDU model
//!
//! Units of captured traffic and the queues that carry them between pipeline stages.

mod pdu;
mod queue;
pub mod util;

pub use pdu::{Pdu, PduDestination, DEFAULT_CHARSET};
pub use queue::PduQueue;

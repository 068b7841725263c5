//! Stage queues of one direction

use std::sync::Arc;

use crate::common::{ProxyError, Result};
use crate::pdu::{Pdu, PduDestination, PduQueue};

/// Queues linking the stages of one direction
///
/// A pipeline with `n` interceptor stages owns `n + 1` queues: queue `i` feeds stage `i`
/// and queue `n` feeds the consumer writing to connections.
#[derive(Debug)]
pub struct Pipeline {
    direction: PduDestination,
    queues: Vec<Arc<PduQueue>>,
}

impl Pipeline {
    /// Allocate the queues for `stages` interceptors
    pub fn new(direction: PduDestination, stages: usize) -> Self {
        Self {
            direction,
            queues: (0..=stages).map(|_| Arc::new(PduQueue::new())).collect(),
        }
    }

    /// Destination of the PDUs flowing through this pipeline
    pub fn direction(&self) -> PduDestination {
        self.direction
    }

    /// Number of interceptor stages
    pub fn stages(&self) -> usize {
        self.queues.len() - 1
    }

    pub fn queue(&self, index: usize) -> Option<&Arc<PduQueue>> {
        self.queues.get(index)
    }

    /// Queue feeding the first stage
    pub fn entry(&self) -> &Arc<PduQueue> {
        &self.queues[0]
    }

    /// Queue feeding the consumer
    pub fn exit(&self) -> &Arc<PduQueue> {
        &self.queues[self.stages()]
    }

    /// Push a PDU into the queue of stage `index`
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidPdu` when `index` is past the consumer queue.
    pub fn push(&self, pdu: Pdu, index: usize) -> Result<()> {
        let queue = self.queue(index).ok_or_else(|| {
            ProxyError::InvalidPdu(format!(
                "stage {} out of range for {} pipeline with {} stage(s)",
                index,
                self.direction,
                self.stages()
            ))
        })?;
        queue.push(pdu);
        Ok(())
    }
}

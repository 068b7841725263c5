//! PDU queue
//!
//! Ordered FIFO of PDUs shared by exactly one producer stage and one consumer stage.
//! Pushing never blocks; popping parks the calling task until a PDU arrives.

use std::collections::VecDeque;
use std::mem;
use std::sync::Mutex;

use log::trace;
use tokio::sync::Notify;

use crate::common::sync::lock;

use super::Pdu;

#[derive(Debug, Default)]
struct State {
    items: VecDeque<Pdu>,
    closed: bool,
}

/// Concurrency-safe FIFO queue of PDUs
#[derive(Debug, Default)]
pub struct PduQueue {
    state: Mutex<State>,
    available: Notify,
}

impl PduQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a PDU to the end of the queue
    ///
    /// PDUs pushed into a closed queue are discarded.
    pub fn push(&self, pdu: Pdu) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                drop(state);
                trace!("[{}] discarding PDU pushed into a closed queue", pdu.connection());
                return;
            }
            state.items.push_back(pdu);
        }
        self.available.notify_one();
    }

    /// Take the PDU at the head of the queue, waiting until one is available
    ///
    /// Returns `None` once the queue is closed. Cancel safe: a pop abandoned at its
    /// await point loses no PDU.
    pub async fn pop(&self) -> Option<Pdu> {
        loop {
            let available = self.available.notified();
            {
                let mut state = lock(&self.state);
                if let Some(pdu) = state.items.pop_front() {
                    return Some(pdu);
                }
                if state.closed {
                    return None;
                }
            }
            available.await;
        }
    }

    /// Take the PDU at the head of the queue without waiting
    pub fn try_pop(&self) -> Option<Pdu> {
        lock(&self.state).items.pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue, discarding every waiting PDU
    ///
    /// Waiting and later pops return `None`; later pushes are discarded. Returns the
    /// number of PDUs discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = lock(&self.state);
            state.closed = true;
            mem::take(&mut state.items)
        };
        self.available.notify_waiters();
        self.available.notify_one();
        discarded.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

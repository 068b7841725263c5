//! Connection
//!
//! One client/server session of a proxy. The connection owns one outgoing queue per
//! direction and the tasks that move bytes between the sockets and those queues.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use tokio::task::JoinSet;

use crate::common::sync::lock;
use crate::pdu::{Pdu, PduDestination, PduQueue};

/// Active session between a client and the target server
pub struct Connection {
    /// Identifier, unique within the owning proxy
    id: u64,
    /// Code of the owning proxy
    proxy: Arc<str>,
    /// Client address, when known
    peer: Option<SocketAddr>,
    /// PDUs waiting to be written to the server
    outgoing_c2s: PduQueue,
    /// PDUs waiting to be written to the client
    outgoing_s2c: PduQueue,
    closing: AtomicBool,
    tasks: Mutex<JoinSet<()>>,
}

impl Connection {
    /// Create a connection
    ///
    /// # Parameters
    ///
    /// * `id` - Identifier issued by the owning `ConnectionManager`
    /// * `proxy` - Code of the owning proxy
    /// * `peer` - Client address
    pub fn new(id: u64, proxy: impl Into<Arc<str>>, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            proxy: proxy.into(),
            peer,
            outgoing_c2s: PduQueue::new(),
            outgoing_s2c: PduQueue::new(),
            closing: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a PDU for writing to the side it is destined for
    ///
    /// PDUs sent to a stopped connection are discarded.
    pub fn send(&self, pdu: Pdu) {
        if self.is_closing() {
            trace!("[{}] discarding {} bytes sent after stop", self, pdu.size());
            return;
        }
        match pdu.destination() {
            PduDestination::Server => self.send_c2s(pdu),
            PduDestination::Client => self.send_s2c(pdu),
        }
    }

    /// Queue a PDU for writing to the server
    pub fn send_c2s(&self, pdu: Pdu) {
        trace!("[{}] queue {} bytes for server", self, pdu.size());
        self.outgoing_c2s.push(pdu);
    }

    /// Queue a PDU for writing to the client
    pub fn send_s2c(&self, pdu: Pdu) {
        trace!("[{}] queue {} bytes for client", self, pdu.size());
        self.outgoing_s2c.push(pdu);
    }

    /// Outgoing queue feeding the writer of the given side
    pub fn outgoing(&self, destination: PduDestination) -> &PduQueue {
        match destination {
            PduDestination::Server => &self.outgoing_c2s,
            PduDestination::Client => &self.outgoing_s2c,
        }
    }

    /// Run a task for the lifetime of this connection
    ///
    /// The task is aborted when the connection stops. Spawning on a stopped connection
    /// is ignored.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Checked under the task lock so a concurrent stop either sees the task or
        // refuses it
        let mut tasks = lock(&self.tasks);
        if self.is_closing() {
            return;
        }
        tasks.spawn(task);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Stop the connection, aborting its transport tasks
    ///
    /// Dropping the tasks drops the socket halves they own, closing both transports.
    /// Both outgoing queues are closed and emptied: queued PDUs reference this
    /// connection and would otherwise keep it alive. Returns `true` only for the call that actually stopped the connection.
    pub fn stop(&self) -> bool {
        if self
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        debug!("[{}] stopping connection", self);
        lock(&self.tasks).abort_all();
        let discarded = self.outgoing_c2s.close() + self.outgoing_s2c.close();
        if discarded > 0 {
            debug!("[{}] discarded {} unsent PDU(s)", self, discarded);
        }
        true
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.proxy, self.id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("proxy", &self.proxy)
            .field("peer", &self.peer)
            .field("closing", &self.is_closing())
            .finish()
    }
}

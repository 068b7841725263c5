//! Connection registry of a single proxy

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};

use crate::common::sync::{read, write};
use crate::core::{ConnectionListener, ListenerRegistry};

use super::Connection;

/// Registry of the active connections of one proxy
///
/// Safe for concurrent use from any number of accept and connection tasks.
pub struct ConnectionManager {
    proxy: Arc<str>,
    next_id: AtomicU64,
    connections: RwLock<HashMap<u64, Arc<Connection>>>,
    /// Set by `stop`; no connection is registered afterwards
    stopped: AtomicBool,
    listeners: Arc<ListenerRegistry<dyn ConnectionListener>>,
}

impl ConnectionManager {
    /// Create an empty registry
    ///
    /// # Parameters
    ///
    /// * `proxy` - Code of the owning proxy
    /// * `listeners` - Registry notified when connections start and stop
    pub fn new(proxy: impl Into<Arc<str>>, listeners: Arc<ListenerRegistry<dyn ConnectionListener>>) -> Self {
        Self {
            proxy: proxy.into(),
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            listeners,
        }
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    /// Issue the next connection identifier; identifiers increase monotonically
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection and notify listeners
    ///
    /// After `stop` the connection is stopped instead of registered and `false` is
    /// returned.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let count = {
            let mut connections = write(&self.connections);
            if self.stopped.load(Ordering::Acquire) {
                drop(connections);
                warn!("[{}] rejected, proxy is stopping", connection);
                connection.stop();
                return false;
            }
            connections.insert(connection.id(), Arc::clone(&connection));
            connections.len()
        };
        metrics::gauge!("proxy.connections.active", "proxy" => self.proxy.to_string()).set(count as f64);
        info!("[{}] connection started (peer: {:?})", connection, connection.peer());

        self.listeners
            .notify(|listener| listener.on_connection_start(&self.proxy, &connection));
        true
    }

    /// Remove a connection and notify listeners
    ///
    /// Returns the removed connection, or `None` when it was not registered.
    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        let (removed, count) = {
            let mut connections = write(&self.connections);
            let removed = connections.remove(&id);
            (removed, connections.len())
        };

        let connection = removed?;
        metrics::gauge!("proxy.connections.active", "proxy" => self.proxy.to_string()).set(count as f64);
        info!("[{}] connection stopped", connection);

        self.listeners
            .notify(|listener| listener.on_connection_stop(&self.proxy, &connection));
        Some(connection)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        read(&self.connections).get(&id).cloned()
    }

    /// Snapshot of the active connections, ordered by id
    pub fn list(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<_> = read(&self.connections).values().cloned().collect();
        connections.sort_by_key(|connection| connection.id());
        connections
    }

    pub fn len(&self) -> usize {
        read(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and remove every connection
    ///
    /// Connections added later are stopped right away.
    pub fn stop(&self) {
        let connections = {
            let registered = write(&self.connections);
            self.stopped.store(true, Ordering::Release);
            registered.values().cloned().collect::<Vec<_>>()
        };
        debug!("[{}] stopping {} connection(s)", self.proxy, connections.len());
        for connection in connections {
            connection.stop();
            self.remove(connection.id());
        }
    }
}

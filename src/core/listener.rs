//! Listener registries
//!
//! Registries keep only weak references: a listener stays registered for as long as
//! somebody else keeps it alive, and dead entries are purged during the next traversal.

use std::sync::{Arc, RwLock, Weak};

use crate::common::sync::{read, write};
use crate::connection::Connection;

use super::CoreHelper;

/// Receives lifecycle notifications from the orchestrator
#[cfg_attr(test, mockall::automock)]
pub trait CoreListener: Send + Sync {
    fn before_start(&self, _helper: &CoreHelper) {}

    fn after_start(&self, _helper: &CoreHelper) {}

    fn before_stop(&self, _helper: &CoreHelper) {}

    fn after_stop(&self, _helper: &CoreHelper) {}
}

/// Receives notifications about connections of every proxy
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionListener: Send + Sync {
    /// Called after a connection has been registered
    fn on_connection_start(&self, proxy: &str, connection: &Arc<Connection>);

    /// Called after a connection has been removed
    fn on_connection_stop(&self, proxy: &str, connection: &Arc<Connection>);
}

/// Registry of weakly referenced listeners
pub struct ListenerRegistry<L: ?Sized> {
    listeners: RwLock<Vec<Weak<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener; registering the same listener twice is a no-op
    pub fn register(&self, listener: &Arc<L>) {
        let weak = Arc::downgrade(listener);
        let mut listeners = write(&self.listeners);
        if !listeners.iter().any(|existing| Weak::ptr_eq(existing, &weak)) {
            listeners.push(weak);
        }
    }

    /// Unregister a listener
    pub fn unregister(&self, listener: &Arc<L>) {
        let weak = Arc::downgrade(listener);
        write(&self.listeners).retain(|existing| !Weak::ptr_eq(existing, &weak) && existing.strong_count() > 0);
    }

    /// Call `f` for every live listener, in registration order
    ///
    /// Listeners are called outside the registry lock, so a listener may register or
    /// unregister listeners while being notified.
    pub fn notify<F>(&self, mut f: F)
    where
        F: FnMut(&L),
    {
        let (live, dead) = {
            let listeners = read(&self.listeners);
            let live: Vec<Arc<L>> = listeners.iter().filter_map(Weak::upgrade).collect();
            let dead = live.len() != listeners.len();
            (live, dead)
        };

        if dead {
            write(&self.listeners).retain(|listener| listener.strong_count() > 0);
        }

        for listener in &live {
            f(listener);
        }
    }

    /// Number of registered entries, including ones not purged yet
    pub fn len(&self) -> usize {
        read(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

//! Proxy lifecycle fan-out

use std::sync::Arc;

use log::{error, info};

use crate::core::fanout;

use super::ProxyManager;

/// Prepares, starts and stops every proxy of a run in parallel
pub struct ProxyExecutor {
    manager: Arc<ProxyManager>,
}

impl ProxyExecutor {
    pub fn new(manager: Arc<ProxyManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ProxyManager> {
        &self.manager
    }

    /// Prepare every proxy; `false` when any proxy failed
    pub async fn prepare(&self) -> bool {
        fanout::all(self.manager.proxies(), "Proxy prepare", |proxy| {
            let prepared = proxy.prepare();
            if !prepared {
                error!("Proxy {} failed to prepare", proxy.code());
            }
            prepared
        })
        .await
    }

    /// Start every proxy; `false` when any proxy failed
    ///
    /// Proxies that did start keep running; the caller is expected to stop the executor.
    pub async fn start(&self) -> bool {
        let started = fanout::all(self.manager.proxies(), "Proxy start", |proxy| {
            let started = proxy.start();
            if !started {
                error!("Proxy {} failed to start", proxy.code());
            }
            started
        })
        .await;

        if started {
            info!("{} proxy(ies) started", self.manager.len());
        }
        started
    }

    /// Stop every proxy; safe on proxies that never started
    pub async fn stop(&self) {
        fanout::each(self.manager.proxies(), "Proxy stop", |proxy| proxy.stop()).await;
    }
}

//! Proxies of one run

use std::sync::Arc;

use log::debug;

use crate::common::Result;
use crate::core::CoreHelper;

use super::{Proxy, ProxyModule};

/// Proxies created from the enabled modules for one run
pub struct ProxyManager {
    proxies: Vec<Arc<dyn Proxy>>,
}

impl ProxyManager {
    /// Create one proxy per enabled module
    ///
    /// # Errors
    ///
    /// Fails when any module fails to create its proxy.
    pub fn new(modules: &[Arc<dyn ProxyModule>], helper: &CoreHelper) -> Result<Self> {
        let mut proxies = Vec::new();
        for module in modules.iter().filter(|module| module.enabled()) {
            debug!("Creating proxy {}", module.code());
            proxies.push(module.create_proxy(helper)?);
        }
        Ok(Self { proxies })
    }

    pub fn proxies(&self) -> &[Arc<dyn Proxy>] {
        &self.proxies
    }

    pub fn get(&self, code: &str) -> Option<&Arc<dyn Proxy>> {
        self.proxies.iter().find(|proxy| proxy.code() == code)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

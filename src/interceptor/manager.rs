//! Interceptors of one direction for one run

use std::sync::Arc;

use log::debug;

use crate::common::Result;
use crate::core::CoreHelper;
use crate::pdu::PduDestination;

use super::{Interceptor, InterceptorModule};

/// Ordered interceptors of one direction, created from the enabled modules
pub struct InterceptorManager {
    direction: PduDestination,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorManager {
    /// Create one interceptor per enabled module, in module order
    ///
    /// # Parameters
    ///
    /// * `direction` - Destination of the PDUs the interceptors will see
    /// * `modules` - Configured modules, in pipeline order
    /// * `helper` - Handle onto the run being started
    ///
    /// # Errors
    ///
    /// Fails when any module fails to create its interceptor.
    pub fn new(direction: PduDestination, modules: &[Arc<dyn InterceptorModule>], helper: &CoreHelper) -> Result<Self> {
        let mut interceptors = Vec::new();
        for module in modules.iter().filter(|module| module.enabled()) {
            let index = interceptors.len();
            debug!("Creating {} interceptor {} at stage {}", direction, module.code(), index);
            interceptors.push(module.create_interceptor(index, helper)?);
        }

        Ok(Self {
            direction,
            interceptors,
        })
    }

    /// Number of enabled modules in a module list
    pub fn count_enabled(modules: &[Arc<dyn InterceptorModule>]) -> usize {
        modules.iter().filter(|module| module.enabled()).count()
    }

    pub fn direction(&self) -> PduDestination {
        self.direction
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Interceptor>> {
        self.interceptors.get(index)
    }

    /// First interceptor created by the module with the given code
    pub fn find(&self, code: &str) -> Option<&Arc<dyn Interceptor>> {
        self.interceptors.iter().find(|interceptor| interceptor.code() == code)
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

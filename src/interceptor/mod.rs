//! Interceptor pipeline
//!
//! Interceptors are ordered stages of a per-direction pipeline. Each stage may inspect or
//! modify a PDU, or drop it by returning `false`.

mod executor;
mod manager;
mod pipeline;
mod worker;

use std::fmt;
use std::sync::Arc;

use crate::common::Result;
use crate::core::CoreHelper;
use crate::pdu::Pdu;

pub use executor::InterceptorExecutor;
pub use manager::InterceptorManager;
pub use pipeline::Pipeline;
pub use worker::InterceptorWorker;

/// Runtime stage of an interceptor pipeline
///
/// An interceptor is created fresh for every run and belongs to exactly one direction.
/// `intercept` is called from a single worker task, while `prepare` and `stop` run on the
/// blocking pool.
pub trait Interceptor: Send + Sync {
    /// Code of the module that created this interceptor
    fn code(&self) -> &str;

    /// Acquire resources before the run starts
    ///
    /// Returning `false` aborts the whole start sequence.
    fn prepare(&self) -> bool {
        true
    }

    /// Process a PDU
    ///
    /// # Returns
    ///
    /// `true` to pass the PDU to the next stage, `false` to drop it
    fn intercept(&self, pdu: &mut Pdu) -> bool;

    /// Release resources after the run stopped
    fn stop(&self) {}
}

/// Factory of interceptors, configured once and used for every run
pub trait InterceptorModule: Send + Sync {
    fn code(&self) -> &str;

    /// Disabled modules get no stage in the pipeline
    fn enabled(&self) -> bool {
        true
    }

    /// Create the interceptor for one run
    ///
    /// # Parameters
    ///
    /// * `index` - Position of the stage in the pipeline
    /// * `helper` - Handle onto the run the interceptor belongs to
    fn create_interceptor(&self, index: usize, helper: &CoreHelper) -> Result<Arc<dyn Interceptor>>;
}

/// Non-owning reference to a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorRef {
    /// Position of the stage in its pipeline
    pub index: usize,
    /// Code of the interceptor at that stage
    pub code: Arc<str>,
}

impl InterceptorRef {
    pub fn new(index: usize, code: impl Into<Arc<str>>) -> Self {
        Self {
            index,
            code: code.into(),
        }
    }
}

impl fmt::Display for InterceptorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.code, self.index)
    }
}

//! Pipeline stage worker

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, trace};

use crate::pdu::{Pdu, PduQueue};

use super::{Interceptor, InterceptorRef};

/// Moves PDUs from the input queue of a stage, through its interceptor, to the next queue
pub struct InterceptorWorker {
    interceptor: Arc<dyn Interceptor>,
    stage: InterceptorRef,
    input: Arc<PduQueue>,
    output: Arc<PduQueue>,
}

impl InterceptorWorker {
    pub fn new(index: usize, interceptor: Arc<dyn Interceptor>, input: Arc<PduQueue>, output: Arc<PduQueue>) -> Self {
        let stage = InterceptorRef::new(index, interceptor.code());
        Self {
            interceptor,
            stage,
            input,
            output,
        }
    }

    /// Process PDUs until the task is aborted
    pub async fn run(self) {
        while let Some(pdu) = self.input.pop().await {
            if let Some(pdu) = self.process(pdu) {
                self.output.push(pdu);
            }
        }
    }

    /// Run the interceptor on one PDU
    ///
    /// Returns the PDU to forward, or `None` when the interceptor dropped it. A panicking
    /// interceptor is logged and the PDU is forwarded as if it had passed.
    pub fn process(&self, mut pdu: Pdu) -> Option<Pdu> {
        let interceptor = &self.interceptor;
        let passed = match catch_unwind(AssertUnwindSafe(|| interceptor.intercept(&mut pdu))) {
            Ok(passed) => passed,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Interceptor {} panicked on {} PDU: {}", self.stage, pdu.destination(), reason);
                metrics::counter!("interceptor.panics", "interceptor" => self.stage.code.to_string()).increment(1);
                true
            }
        };

        if !passed {
            trace!("[{}] PDU dropped by {}", pdu.connection(), self.stage);
            metrics::counter!("pdu.dropped", "interceptor" => self.stage.code.to_string()).increment(1);
            return None;
        }

        pdu.set_last_interceptor(Some(self.stage.clone()));
        Some(pdu)
    }
}

//! Core helper
//!
//! Handle given to proxies and interceptors when they are created. It lets them push PDUs
//! into the pipelines of the current run or straight to a connection.

use std::sync::Arc;

use log::{trace, warn};
use tokio::sync::watch;

use crate::common::Result;
use crate::interceptor::Pipeline;
use crate::pdu::{Pdu, PduDestination};

use super::{ConnectionListener, CoreState, ListenerRegistry};

/// Cloneable handle onto one run of the orchestrator
#[derive(Clone)]
pub struct CoreHelper {
    inner: Arc<Inner>,
}

struct Inner {
    c2s: Arc<Pipeline>,
    s2c: Arc<Pipeline>,
    connection_listeners: Arc<ListenerRegistry<dyn ConnectionListener>>,
    state: watch::Receiver<CoreState>,
}

impl CoreHelper {
    pub(crate) fn new(
        c2s: Arc<Pipeline>,
        s2c: Arc<Pipeline>,
        connection_listeners: Arc<ListenerRegistry<dyn ConnectionListener>>,
        state: watch::Receiver<CoreState>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                c2s,
                s2c,
                connection_listeners,
                state,
            }),
        }
    }

    /// Pipeline handling PDUs travelling towards `destination`
    pub fn pipeline(&self, destination: PduDestination) -> &Arc<Pipeline> {
        match destination {
            PduDestination::Server => &self.inner.c2s,
            PduDestination::Client => &self.inner.s2c,
        }
    }

    /// Submit a PDU to the pipeline of its destination
    ///
    /// A fresh PDU enters the first stage. A PDU that already went through an interceptor
    /// resumes at the stage right after it.
    pub fn process(&self, pdu: Pdu) {
        let pipeline = self.pipeline(pdu.destination());
        let index = pdu
            .last_interceptor()
            .map_or(0, |interceptor| interceptor.index + 1)
            .min(pipeline.stages());
        trace!("[{}] process {} PDU at stage {}", pdu.connection(), pdu.destination(), index);
        if let Err(e) = pipeline.push(pdu, index) {
            warn!("Failed to process PDU: {}", e);
        }
    }

    /// Submit a PDU to a given stage of the pipeline of its destination
    ///
    /// Index 0 is the first interceptor; the interceptor count goes straight to the
    /// consumer that writes to the connection.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidPdu` when `index` is past the consumer stage.
    pub fn process_from(&self, pdu: Pdu, index: usize) -> Result<()> {
        self.pipeline(pdu.destination()).push(pdu, index)
    }

    /// Bypass the pipeline and queue the PDU on its connection
    pub fn send(&self, pdu: Pdu) {
        let connection = Arc::clone(pdu.connection());
        connection.send(pdu);
    }

    /// Registry notified about connections of every proxy
    pub fn connection_listeners(&self) -> &Arc<ListenerRegistry<dyn ConnectionListener>> {
        &self.inner.connection_listeners
    }

    /// Current orchestrator state
    pub fn state(&self) -> CoreState {
        *self.inner.state.borrow()
    }
}

impl std::fmt::Debug for CoreHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHelper")
            .field("c2s_stages", &self.inner.c2s.stages())
            .field("s2c_stages", &self.inner.s2c.stages())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::interceptor::InterceptorRef;

    fn helper(c2s_stages: usize) -> CoreHelper {
        let (_tx, rx) = watch::channel(CoreState::Stopped);
        CoreHelper::new(
            Arc::new(Pipeline::new(PduDestination::Server, c2s_stages)),
            Arc::new(Pipeline::new(PduDestination::Client, 0)),
            Arc::new(ListenerRegistry::new()),
            rx,
        )
    }

    fn pdu(destination: PduDestination, data: &[u8]) -> Pdu {
        Pdu::new(Arc::new(Connection::new(1, "tcp", None)), destination, data.to_vec())
    }

    #[tokio::test]
    async fn test_process_enters_first_stage() {
        let helper = helper(2);
        helper.process(pdu(PduDestination::Server, b"fresh"));

        let queued = helper.pipeline(PduDestination::Server).queue(0).unwrap().pop().await.unwrap();
        assert_eq!(queued.data(), b"fresh");
    }

    #[tokio::test]
    async fn test_process_resumes_after_last_interceptor() {
        let helper = helper(2);
        let mut resumed = pdu(PduDestination::Server, b"resumed");
        resumed.set_last_interceptor(Some(InterceptorRef::new(0, "first")));
        helper.process(resumed);

        let pipeline = helper.pipeline(PduDestination::Server);
        assert!(pipeline.queue(0).unwrap().try_pop().is_none());
        assert_eq!(pipeline.queue(1).unwrap().pop().await.unwrap().data(), b"resumed");
    }

    #[tokio::test]
    async fn test_process_from_bounds() {
        let helper = helper(2);
        assert!(helper.process_from(pdu(PduDestination::Server, b"x"), 3).is_err());
        assert!(helper.process_from(pdu(PduDestination::Server, b"x"), 2).is_ok());
        assert!(helper.pipeline(PduDestination::Server).exit().try_pop().is_some());
    }

    #[tokio::test]
    async fn test_send_bypasses_pipeline() {
        let helper = helper(1);
        let direct = pdu(PduDestination::Client, b"direct");
        let connection = Arc::clone(direct.connection());
        helper.send(direct);

        assert!(helper.pipeline(PduDestination::Client).entry().try_pop().is_none());
        assert_eq!(connection.outgoing(PduDestination::Client).pop().await.unwrap().data(), b"direct");
    }
}

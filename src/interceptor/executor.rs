//! Interceptor pipeline executor
//!
//! Runs one worker task per stage plus a consumer task that hands surviving PDUs to their
//! connections.

use std::sync::{Arc, Mutex};

use log::{debug, error, info, trace};
use tokio::task::JoinSet;

use crate::common::sync::lock;
use crate::common::{ProxyError, Result};
use crate::core::fanout;
use crate::pdu::{Pdu, PduDestination};

use super::{InterceptorManager, InterceptorWorker, Pipeline};

/// Consumer of the PDUs leaving the last stage
pub type PduConsumer = Arc<dyn Fn(Pdu) + Send + Sync>;

/// Drives the pipeline of one direction
pub struct InterceptorExecutor {
    manager: Arc<InterceptorManager>,
    pipeline: Arc<Pipeline>,
    consumer: PduConsumer,
    tasks: Mutex<JoinSet<()>>,
}

impl InterceptorExecutor {
    /// Create an executor for the interceptors of `manager`
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Lifecycle` when the pipeline was allocated for a different
    /// number of stages.
    pub fn new(manager: Arc<InterceptorManager>, pipeline: Arc<Pipeline>, consumer: PduConsumer) -> Result<Self> {
        if manager.len() != pipeline.stages() || manager.direction() != pipeline.direction() {
            return Err(ProxyError::Lifecycle(format!(
                "{} pipeline has {} stage(s) but {} interceptor(s) were created",
                pipeline.direction(),
                pipeline.stages(),
                manager.len()
            )));
        }

        Ok(Self {
            manager,
            pipeline,
            consumer,
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// Executor delivering surviving PDUs to their connection's outgoing queue
    pub fn with_connection_consumer(manager: Arc<InterceptorManager>, pipeline: Arc<Pipeline>) -> Result<Self> {
        Self::new(
            manager,
            pipeline,
            Arc::new(|pdu: Pdu| {
                let connection = Arc::clone(pdu.connection());
                connection.send(pdu);
            }),
        )
    }

    pub fn direction(&self) -> PduDestination {
        self.pipeline.direction()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn manager(&self) -> &Arc<InterceptorManager> {
        &self.manager
    }

    /// Prepare every interceptor in parallel
    ///
    /// # Returns
    ///
    /// `false` when any interceptor refused to prepare or panicked
    pub async fn prepare(&self) -> bool {
        fanout::all(self.manager.interceptors(), "Interceptor prepare", |interceptor| {
            let prepared = interceptor.prepare();
            if !prepared {
                error!("Interceptor {} failed to prepare", interceptor.code());
            }
            prepared
        })
        .await
    }

    /// Spawn the stage workers and the consumer
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut tasks = lock(&self.tasks);
        for (index, interceptor) in self.manager.interceptors().iter().enumerate() {
            let (Some(input), Some(output)) = (self.pipeline.queue(index), self.pipeline.queue(index + 1)) else {
                continue;
            };
            let worker = InterceptorWorker::new(index, Arc::clone(interceptor), Arc::clone(input), Arc::clone(output));
            tasks.spawn(worker.run());
        }

        let exit = Arc::clone(self.pipeline.exit());
        let consumer = Arc::clone(&self.consumer);
        let direction = self.direction();
        tasks.spawn(async move {
            while let Some(pdu) = exit.pop().await {
                trace!("[{}] {} PDU leaving pipeline ({} bytes)", pdu.connection(), direction, pdu.size());
                metrics::counter!("pdu.processed", "direction" => direction.to_string()).increment(1);
                consumer(pdu);
            }
        });

        info!("{} pipeline started with {} interceptor(s)", direction, self.manager.len());
    }

    /// Abort the workers, then stop every interceptor in parallel
    ///
    /// Safe to call on an executor that was never started, and more than once.
    pub async fn stop(&self) {
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        fanout::each(self.manager.interceptors(), "Interceptor stop", |interceptor| interceptor.stop())
        .await;

        debug!("{} pipeline stopped", self.direction());
    }

    /// Submit a PDU to the first stage
    pub fn intercept(&self, pdu: Pdu) {
        self.pipeline.entry().push(pdu);
    }

    /// Submit a PDU to the given stage
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidPdu` when `index` is past the consumer stage.
    pub fn intercept_at(&self, pdu: Pdu, index: usize) -> Result<()> {
        self.pipeline.push(pdu, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::core::{CoreHelper, CoreState, ListenerRegistry};
    use crate::interceptor::{Interceptor, InterceptorModule};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    #[derive(Default)]
    struct Counting {
        code: String,
        drop_marker: Option<u8>,
        fail_prepare: bool,
        calls: AtomicUsize,
        stopped: AtomicBool,
    }

    impl Interceptor for Counting {
        fn code(&self) -> &str {
            &self.code
        }

        fn prepare(&self) -> bool {
            !self.fail_prepare
        }

        fn intercept(&self, pdu: &mut Pdu) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            pdu.add_tag(self.code.clone());
            !matches!(self.drop_marker, Some(marker) if pdu.data().first() == Some(&marker))
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Module(Arc<Counting>);

    impl InterceptorModule for Module {
        fn code(&self) -> &str {
            &self.0.code
        }

        fn create_interceptor(&self, _index: usize, _helper: &CoreHelper) -> Result<Arc<dyn Interceptor>> {
            Ok(self.0.clone())
        }
    }

    fn counting(code: &str, drop_marker: Option<u8>, fail_prepare: bool) -> Arc<Counting> {
        Arc::new(Counting {
            code: code.to_string(),
            drop_marker,
            fail_prepare,
            ..Default::default()
        })
    }

    fn executor(stages: &[Arc<Counting>]) -> (InterceptorExecutor, mpsc::UnboundedReceiver<Pdu>) {
        let pipeline = Arc::new(Pipeline::new(PduDestination::Server, stages.len()));
        let (_state, state_rx) = watch::channel(CoreState::Starting);
        let helper = CoreHelper::new(
            Arc::clone(&pipeline),
            Arc::new(Pipeline::new(PduDestination::Client, 0)),
            Arc::new(ListenerRegistry::new()),
            state_rx,
        );
        let modules: Vec<Arc<dyn InterceptorModule>> = stages
            .iter()
            .map(|stage| Arc::new(Module(Arc::clone(stage))) as Arc<dyn InterceptorModule>)
            .collect();
        let manager = Arc::new(InterceptorManager::new(PduDestination::Server, &modules, &helper).unwrap());

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer: PduConsumer = Arc::new(move |pdu| {
            let _ = tx.send(pdu);
        });
        (InterceptorExecutor::new(manager, pipeline, consumer).unwrap(), rx)
    }

    fn pdu(connection: &Arc<Connection>, data: &[u8]) -> Pdu {
        Pdu::new(Arc::clone(connection), PduDestination::Server, data.to_vec())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_order_and_content_preserved() {
        let first = counting("first", None, false);
        let second = counting("second", None, false);
        let (executor, mut out) = executor(&[first.clone(), second.clone()]);
        assert!(executor.prepare().await);
        executor.start();

        let connection = Arc::new(Connection::new(1, "tcp", None));
        let messages: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i; (i as usize) % 7]).collect();
        for message in &messages {
            executor.intercept(pdu(&connection, message));
        }

        for message in &messages {
            let received = tokio::time::timeout(Duration::from_secs(5), out.recv()).await.unwrap().unwrap();
            assert_eq!(received.data(), message.as_slice());
            assert!(received.has_tag("first") && received.has_tag("second"));
            assert_eq!(received.last_interceptor().map(|r| r.index), Some(1));
        }
        assert_eq!(first.calls.load(Ordering::SeqCst), 50);
        assert_eq!(second.calls.load(Ordering::SeqCst), 50);

        executor.stop().await;
        assert!(first.stopped.load(Ordering::SeqCst));
        assert!(second.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_skips_later_stages() {
        let dropper = counting("dropper", Some(b'X'), false);
        let after = counting("after", None, false);
        let (executor, mut out) = executor(&[dropper.clone(), after.clone()]);
        executor.start();

        let connection = Arc::new(Connection::new(1, "tcp", None));
        executor.intercept(pdu(&connection, b"Xdropped"));
        executor.intercept(pdu(&connection, b"kept"));

        let received = tokio::time::timeout(Duration::from_secs(5), out.recv()).await.unwrap().unwrap();
        assert_eq!(received.data(), b"kept");
        assert_eq!(dropper.calls.load(Ordering::SeqCst), 2);
        assert_eq!(after.calls.load(Ordering::SeqCst), 1);

        executor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_prepare_failure() {
        let good = counting("good", None, false);
        let bad = counting("bad", None, true);
        let (executor, _out) = executor(&[good, bad]);
        assert!(!executor.prepare().await);
        // Never started, stop still succeeds
        executor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_intercept_at_skips_stages() {
        let first = counting("first", None, false);
        let second = counting("second", None, false);
        let (executor, mut out) = executor(&[first.clone(), second.clone()]);
        executor.start();

        let connection = Arc::new(Connection::new(1, "tcp", None));
        executor.intercept_at(pdu(&connection, b"late"), 1).unwrap();
        assert!(executor.intercept_at(pdu(&connection, b"bad"), 3).is_err());

        let received = tokio::time::timeout(Duration::from_secs(5), out.recv()).await.unwrap().unwrap();
        assert_eq!(received.data(), b"late");
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);

        executor.stop().await;
    }

    #[tokio::test]
    async fn test_stage_count_mismatch() {
        let stage = counting("only", None, false);
        let (executor, _out) = executor(&[stage]);
        let manager = Arc::clone(executor.manager());
        let result = InterceptorExecutor::with_connection_consumer(
            manager,
            Arc::new(Pipeline::new(PduDestination::Server, 2)),
        );
        assert!(matches!(result, Err(ProxyError::Lifecycle(_))));
    }
}

//! Lifecycle orchestrator
//!
//! Owns the configured proxy and interceptor modules and turns them into a running
//! system. Every start creates a fresh run: new pipelines, proxies and interceptors.
//! Stopping discards the run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::join_all;
use log::{error, info, warn};
use tokio::sync::{watch, Mutex};

use crate::common::{ProxyError, Result};
use crate::config::CoreConfig;
use crate::interceptor::{InterceptorExecutor, InterceptorManager, InterceptorModule, Pipeline};
use crate::interceptors::modules_from_config;
use crate::pdu::PduDestination;
use crate::proxy::{ProxyExecutor, ProxyManager, ProxyModule, TcpProxyModule};

use super::{ConnectionListener, CoreHelper, CoreListener, CoreState, ListenerRegistry};

/// Everything belonging to one start/stop cycle
struct Run {
    helper: CoreHelper,
    proxies: ProxyExecutor,
    pipelines: Vec<InterceptorExecutor>,
}

impl Run {
    /// Stop proxies, then both pipelines; safe on a partially started run
    async fn teardown(&self) {
        self.proxies.stop().await;
        join_all(self.pipelines.iter().map(InterceptorExecutor::stop)).await;
    }
}

/// Single state machine driving proxies and interceptor pipelines
pub struct Orchestrator {
    proxy_modules: Vec<Arc<dyn ProxyModule>>,
    c2s_modules: Vec<Arc<dyn InterceptorModule>>,
    s2c_modules: Vec<Arc<dyn InterceptorModule>>,
    core_listeners: ListenerRegistry<dyn CoreListener>,
    connection_listeners: Arc<ListenerRegistry<dyn ConnectionListener>>,
    state: watch::Sender<CoreState>,
    run: Mutex<Option<Run>>,
}

impl Orchestrator {
    /// Create a stopped orchestrator
    ///
    /// # Parameters
    ///
    /// * `proxy_modules` - Proxies to run
    /// * `c2s_modules` - Client to server interceptors, in pipeline order
    /// * `s2c_modules` - Server to client interceptors, in pipeline order
    pub fn new(
        proxy_modules: Vec<Arc<dyn ProxyModule>>,
        c2s_modules: Vec<Arc<dyn InterceptorModule>>,
        s2c_modules: Vec<Arc<dyn InterceptorModule>>,
    ) -> Self {
        let (state, _) = watch::channel(CoreState::Stopped);
        Self {
            proxy_modules,
            c2s_modules,
            s2c_modules,
            core_listeners: ListenerRegistry::new(),
            connection_listeners: Arc::new(ListenerRegistry::new()),
            state,
            run: Mutex::new(None),
        }
    }

    /// Orchestrator running the TCP proxies and built-in interceptors of `config`
    pub fn from_config(config: &CoreConfig) -> Self {
        let proxies = config
            .proxies
            .iter()
            .map(|proxy| Arc::new(TcpProxyModule::new(proxy.clone())) as Arc<dyn ProxyModule>)
            .collect();

        Self::new(
            proxies,
            modules_from_config(&config.interceptors_c2s),
            modules_from_config(&config.interceptors_s2c),
        )
    }

    pub fn state(&self) -> CoreState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<CoreState> {
        self.state.subscribe()
    }

    pub fn register_core_listener(&self, listener: &Arc<dyn CoreListener>) {
        self.core_listeners.register(listener);
    }

    pub fn unregister_core_listener(&self, listener: &Arc<dyn CoreListener>) {
        self.core_listeners.unregister(listener);
    }

    /// Listeners registered here follow connections of every future run
    pub fn register_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.connection_listeners.register(listener);
    }

    pub fn unregister_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.connection_listeners.unregister(listener);
    }

    /// Helper of the current run
    pub async fn helper(&self) -> Option<CoreHelper> {
        self.run.lock().await.as_ref().map(|run| run.helper.clone())
    }

    /// Proxies of the current run
    pub async fn proxy_manager(&self) -> Option<Arc<ProxyManager>> {
        self.run
            .lock()
            .await
            .as_ref()
            .map(|run| Arc::clone(run.proxies.manager()))
    }

    /// Interceptors of the current run for PDUs travelling towards `destination`
    pub async fn interceptor_manager(&self, destination: PduDestination) -> Option<Arc<InterceptorManager>> {
        self.run.lock().await.as_ref().and_then(|run| {
            run.pipelines
                .iter()
                .find(|pipeline| pipeline.direction() == destination)
                .map(|pipeline| Arc::clone(pipeline.manager()))
        })
    }

    /// Start a new run
    ///
    /// Any failure while preparing or starting tears the run down again and leaves the
    /// orchestrator `Stopped`.
    ///
    /// # Errors
    ///
    /// `ProxyError::Lifecycle` when not stopped, or when a proxy or interceptor failed to
    /// prepare or start. Module errors are returned as they are.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.run.lock().await;
        let current = self.state();
        if current != CoreState::Stopped {
            return Err(ProxyError::Lifecycle(format!("Cannot start while {}", current)));
        }

        self.set_state(CoreState::Starting);

        // Queues exist before anything that could produce into them
        let helper = CoreHelper::new(
            Arc::new(Pipeline::new(
                PduDestination::Server,
                InterceptorManager::count_enabled(&self.c2s_modules),
            )),
            Arc::new(Pipeline::new(
                PduDestination::Client,
                InterceptorManager::count_enabled(&self.s2c_modules),
            )),
            Arc::clone(&self.connection_listeners),
            self.state.subscribe(),
        );
        self.notify_core("before_start", |listener| listener.before_start(&helper));

        match self.launch(&helper).await {
            Ok(run) => {
                *slot = Some(run);
                self.set_state(CoreState::Started);
                self.notify_core("after_start", |listener| listener.after_start(&helper));
                Ok(())
            }
            Err(e) => {
                error!("Start failed: {}", e);
                self.set_state(CoreState::Stopped);
                Err(e)
            }
        }
    }

    /// Stop the current run; a no-op when already stopped
    pub async fn stop(&self) {
        let mut slot = self.run.lock().await;
        let Some(run) = slot.take() else {
            return;
        };

        self.set_state(CoreState::Stopping);
        self.notify_core("before_stop", |listener| listener.before_stop(&run.helper));

        run.teardown().await;

        self.set_state(CoreState::Stopped);
        self.notify_core("after_stop", |listener| listener.after_stop(&run.helper));
    }

    async fn launch(&self, helper: &CoreHelper) -> Result<Run> {
        let proxies = ProxyManager::new(&self.proxy_modules, helper)?;
        let mut run = Run {
            helper: helper.clone(),
            proxies: ProxyExecutor::new(Arc::new(proxies)),
            pipelines: Vec::with_capacity(2),
        };

        if let Err(e) = self.bring_up(&mut run).await {
            warn!("Rolling back partially started run");
            run.teardown().await;
            return Err(e);
        }
        Ok(run)
    }

    async fn bring_up(&self, run: &mut Run) -> Result<()> {
        if !run.proxies.prepare().await {
            return Err(ProxyError::Lifecycle("Proxy preparation failed".to_string()));
        }

        for (destination, modules) in [
            (PduDestination::Server, &self.c2s_modules),
            (PduDestination::Client, &self.s2c_modules),
        ] {
            let manager = InterceptorManager::new(destination, modules, &run.helper)?;
            let pipeline = Arc::clone(run.helper.pipeline(destination));
            run.pipelines
                .push(InterceptorExecutor::with_connection_consumer(Arc::new(manager), pipeline)?);
        }

        let prepared = join_all(run.pipelines.iter().map(InterceptorExecutor::prepare)).await;
        if prepared.contains(&false) {
            return Err(ProxyError::Lifecycle("Interceptor preparation failed".to_string()));
        }

        // Pipelines drain before any proxy produces
        for pipeline in &run.pipelines {
            pipeline.start();
        }

        if !run.proxies.start().await {
            return Err(ProxyError::Lifecycle("Proxy start failed".to_string()));
        }
        Ok(())
    }

    /// Notify core listeners; a panicking listener is logged and skipped
    fn notify_core<F>(&self, event: &str, f: F)
    where
        F: Fn(&dyn CoreListener),
    {
        self.core_listeners.notify(|listener| {
            if catch_unwind(AssertUnwindSafe(|| f(listener))).is_err() {
                error!("Core listener panicked in {}", event);
            }
        });
    }

    fn set_state(&self, state: CoreState) {
        self.state.send_replace(state);
        info!("Core {}", state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionManager};
    use crate::core::MockCoreListener;
    use crate::interceptor::Interceptor;
    use crate::pdu::Pdu;
    use crate::proxy::Proxy;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Calls {
        prepared: AtomicUsize,
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl Calls {
        fn get(&self) -> (usize, usize, usize) {
            (
                self.prepared.load(Ordering::SeqCst),
                self.started.load(Ordering::SeqCst),
                self.stopped.load(Ordering::SeqCst),
            )
        }
    }

    struct TestProxy {
        code: String,
        prepare_ok: bool,
        start_ok: bool,
        calls: Arc<Calls>,
        connections: Arc<ConnectionManager>,
    }

    impl Proxy for TestProxy {
        fn code(&self) -> &str {
            &self.code
        }

        fn prepare(&self) -> bool {
            self.calls.prepared.fetch_add(1, Ordering::SeqCst);
            self.prepare_ok
        }

        fn start(&self) -> bool {
            self.calls.started.fetch_add(1, Ordering::SeqCst);
            self.start_ok
        }

        fn stop(&self) {
            self.calls.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn connection_manager(&self) -> &Arc<ConnectionManager> {
            &self.connections
        }
    }

    struct TestProxyModule {
        code: &'static str,
        prepare_ok: bool,
        start_ok: bool,
        calls: Arc<Calls>,
    }

    impl TestProxyModule {
        fn new(code: &'static str, prepare_ok: bool, start_ok: bool) -> (Arc<dyn ProxyModule>, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            let module = Self {
                code,
                prepare_ok,
                start_ok,
                calls: Arc::clone(&calls),
            };
            (Arc::new(module), calls)
        }
    }

    impl ProxyModule for TestProxyModule {
        fn code(&self) -> &str {
            self.code
        }

        fn create_proxy(&self, helper: &CoreHelper) -> Result<Arc<dyn Proxy>> {
            Ok(Arc::new(TestProxy {
                code: self.code.to_string(),
                prepare_ok: self.prepare_ok,
                start_ok: self.start_ok,
                calls: Arc::clone(&self.calls),
                connections: Arc::new(ConnectionManager::new(
                    self.code,
                    Arc::clone(helper.connection_listeners()),
                )),
            }))
        }
    }

    struct CountingInterceptor {
        prepare_ok: bool,
        calls: Arc<Calls>,
    }

    impl Interceptor for CountingInterceptor {
        fn code(&self) -> &str {
            "count"
        }

        fn prepare(&self) -> bool {
            self.calls.prepared.fetch_add(1, Ordering::SeqCst);
            self.prepare_ok
        }

        fn intercept(&self, _pdu: &mut Pdu) -> bool {
            self.calls.started.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn stop(&self) {
            self.calls.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingModule {
        prepare_ok: bool,
        calls: Arc<Calls>,
    }

    impl CountingModule {
        fn new(prepare_ok: bool) -> (Arc<dyn InterceptorModule>, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            let module = Self {
                prepare_ok,
                calls: Arc::clone(&calls),
            };
            (Arc::new(module), calls)
        }
    }

    impl InterceptorModule for CountingModule {
        fn code(&self) -> &str {
            "count"
        }

        fn create_interceptor(&self, _index: usize, _helper: &CoreHelper) -> Result<Arc<dyn Interceptor>> {
            Ok(Arc::new(CountingInterceptor {
                prepare_ok: self.prepare_ok,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop() {
        let (first, first_calls) = TestProxyModule::new("first", true, true);
        let (second, second_calls) = TestProxyModule::new("second", true, true);
        let (c2s, c2s_calls) = CountingModule::new(true);
        let orchestrator = Orchestrator::new(vec![first, second], vec![c2s], Vec::new());
        assert_eq!(orchestrator.state(), CoreState::Stopped);

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state(), CoreState::Started);
        assert_eq!(first_calls.get(), (1, 1, 0));
        assert_eq!(second_calls.get(), (1, 1, 0));
        assert_eq!(orchestrator.proxy_manager().await.unwrap().len(), 2);
        assert_eq!(
            orchestrator
                .interceptor_manager(PduDestination::Server)
                .await
                .unwrap()
                .len(),
            1
        );

        orchestrator.stop().await;
        assert_eq!(orchestrator.state(), CoreState::Stopped);
        assert_eq!(first_calls.get(), (1, 1, 1));
        assert_eq!(second_calls.get(), (1, 1, 1));
        assert_eq!(c2s_calls.get(), (1, 0, 1));
        assert!(orchestrator.helper().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_proxy_prepare_failure_starts_nothing() {
        let (good, good_calls) = TestProxyModule::new("good", true, true);
        let (bad, bad_calls) = TestProxyModule::new("bad", false, true);
        let (c2s, c2s_calls) = CountingModule::new(true);
        let orchestrator = Orchestrator::new(vec![good, bad], vec![c2s], Vec::new());

        let result = orchestrator.start().await;
        assert!(matches!(result, Err(ProxyError::Lifecycle(_))));
        assert_eq!(orchestrator.state(), CoreState::Stopped);
        assert_eq!(good_calls.started.load(Ordering::SeqCst), 0);
        assert_eq!(bad_calls.started.load(Ordering::SeqCst), 0);
        assert_eq!(c2s_calls.prepared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interceptor_prepare_failure_starts_no_proxy() {
        let (proxy, proxy_calls) = TestProxyModule::new("proxy", true, true);
        let (ok, ok_calls) = CountingModule::new(true);
        let (bad, _) = CountingModule::new(false);
        let orchestrator = Orchestrator::new(vec![proxy], vec![ok], vec![bad]);

        assert!(orchestrator.start().await.is_err());
        assert_eq!(orchestrator.state(), CoreState::Stopped);
        assert_eq!(proxy_calls.get(), (1, 0, 1));
        assert_eq!(ok_calls.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_proxy_start_failure_stops_everything() {
        let (good, good_calls) = TestProxyModule::new("good", true, true);
        let (bad, bad_calls) = TestProxyModule::new("bad", true, false);
        let orchestrator = Orchestrator::new(vec![good, bad], Vec::new(), Vec::new());

        assert!(orchestrator.start().await.is_err());
        assert_eq!(orchestrator.state(), CoreState::Stopped);
        assert_eq!(good_calls.get(), (1, 1, 1));
        assert_eq!(bad_calls.get(), (1, 1, 1));

        // A later attempt starts from scratch
        assert!(orchestrator.start().await.is_err());
        assert_eq!(good_calls.get(), (2, 2, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_is_idempotent_and_start_requires_stopped() {
        let (proxy, calls) = TestProxyModule::new("proxy", true, true);
        let orchestrator = Orchestrator::new(vec![proxy], Vec::new(), Vec::new());

        orchestrator.stop().await;
        assert_eq!(calls.get(), (0, 0, 0));

        orchestrator.start().await.unwrap();
        assert!(matches!(orchestrator.start().await, Err(ProxyError::Lifecycle(_))));

        orchestrator.stop().await;
        orchestrator.stop().await;
        assert_eq!(calls.get(), (1, 1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_core_listeners_in_order() {
        let mut mock = MockCoreListener::new();
        let mut seq = Sequence::new();
        mock.expect_before_start().times(1).in_sequence(&mut seq).return_const(());
        mock.expect_after_start().times(1).in_sequence(&mut seq).return_const(());
        mock.expect_before_stop().times(1).in_sequence(&mut seq).return_const(());
        mock.expect_after_stop().times(1).in_sequence(&mut seq).return_const(());
        let listener: Arc<dyn CoreListener> = Arc::new(mock);

        let orchestrator = Orchestrator::new(Vec::new(), Vec::new(), Vec::new());
        orchestrator.register_core_listener(&listener);

        orchestrator.start().await.unwrap();
        orchestrator.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_listener_does_not_wedge_lifecycle() {
        struct Panicking;

        impl CoreListener for Panicking {
            fn before_start(&self, _helper: &CoreHelper) {
                panic!("listener failure");
            }

            fn before_stop(&self, _helper: &CoreHelper) {
                panic!("listener failure");
            }
        }

        let listener: Arc<dyn CoreListener> = Arc::new(Panicking);

        let (proxy, calls) = TestProxyModule::new("tcp", true, true);
        let orchestrator = Orchestrator::new(vec![proxy], Vec::new(), Vec::new());
        orchestrator.register_core_listener(&listener);

        for _ in 0..2 {
            orchestrator.start().await.unwrap();
            assert_eq!(orchestrator.state(), CoreState::Started);
            orchestrator.stop().await;
            assert_eq!(orchestrator.state(), CoreState::Stopped);
        }
        assert_eq!(calls.get(), (2, 2, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_state_subscription() {
        let orchestrator = Orchestrator::new(Vec::new(), Vec::new(), Vec::new());
        let mut states = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        assert_eq!(*states.borrow_and_update(), CoreState::Started);

        orchestrator.stop().await;
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), CoreState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_running_pipeline_delivers_to_connection() {
        let (c2s, c2s_calls) = CountingModule::new(true);
        let orchestrator = Orchestrator::new(Vec::new(), vec![c2s], Vec::new());
        orchestrator.start().await.unwrap();

        let helper = orchestrator.helper().await.unwrap();
        assert_eq!(helper.state(), CoreState::Started);

        let connection = Arc::new(Connection::new(1, "test", None));
        helper.process(Pdu::new(Arc::clone(&connection), PduDestination::Server, b"ping".to_vec()));

        let pdu = tokio::time::timeout(Duration::from_secs(1), connection.outgoing(PduDestination::Server).pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pdu.data(), b"ping");
        assert_eq!(pdu.last_interceptor().unwrap().index, 0);
        assert_eq!(c2s_calls.started.load(Ordering::SeqCst), 1);

        orchestrator.stop().await;
    }
}

//! End-to-end pipeline tests
//!
//! A loopback proxy stands in for the transport: the test feeds PDUs the way reader loops
//! do and collects them from the connection's outgoing queues the way writer loops do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use interception_proxy::connection::{Connection, ConnectionManager};
use interception_proxy::core::ConnectionListener;
use interception_proxy::{
    CoreHelper, CoreState, Interceptor, InterceptorModule, Orchestrator, Pdu, PduDestination, Proxy, ProxyModule,
    Result,
};

struct LoopbackProxy {
    connections: Arc<ConnectionManager>,
}

impl Proxy for LoopbackProxy {
    fn code(&self) -> &str {
        "loopback"
    }

    fn prepare(&self) -> bool {
        true
    }

    fn start(&self) -> bool {
        true
    }

    fn stop(&self) {
        self.connections.stop();
    }

    fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }
}

struct LoopbackModule;

impl ProxyModule for LoopbackModule {
    fn code(&self) -> &str {
        "loopback"
    }

    fn create_proxy(&self, helper: &CoreHelper) -> Result<Arc<dyn Proxy>> {
        Ok(Arc::new(LoopbackProxy {
            connections: Arc::new(ConnectionManager::new(
                "loopback",
                Arc::clone(helper.connection_listeners()),
            )),
        }))
    }
}

struct CountingInterceptor {
    code: &'static str,
    count: Arc<AtomicUsize>,
}

impl Interceptor for CountingInterceptor {
    fn code(&self) -> &str {
        self.code
    }

    fn intercept(&self, _pdu: &mut Pdu) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct CountingModule {
    code: &'static str,
    count: Arc<AtomicUsize>,
}

impl InterceptorModule for CountingModule {
    fn code(&self) -> &str {
        self.code
    }

    fn create_interceptor(&self, _index: usize, _helper: &CoreHelper) -> Result<Arc<dyn Interceptor>> {
        Ok(Arc::new(CountingInterceptor {
            code: self.code,
            count: Arc::clone(&self.count),
        }))
    }
}

/// Drops PDUs tagged `drop`
struct TagDropModule;

struct TagDropInterceptor;

impl Interceptor for TagDropInterceptor {
    fn code(&self) -> &str {
        "tag-drop"
    }

    fn intercept(&self, pdu: &mut Pdu) -> bool {
        !pdu.has_tag("drop")
    }
}

impl InterceptorModule for TagDropModule {
    fn code(&self) -> &str {
        "tag-drop"
    }

    fn create_interceptor(&self, _index: usize, _helper: &CoreHelper) -> Result<Arc<dyn Interceptor>> {
        Ok(Arc::new(TagDropInterceptor))
    }
}

#[derive(Default)]
struct RecordingListener {
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl ConnectionListener for RecordingListener {
    fn on_connection_start(&self, _proxy: &str, _connection: &Arc<Connection>) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_stop(&self, _proxy: &str, _connection: &Arc<Connection>) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting(code: &'static str) -> (Arc<dyn InterceptorModule>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let module = CountingModule {
        code,
        count: Arc::clone(&count),
    };
    (Arc::new(module), count)
}

async fn next(connection: &Connection, destination: PduDestination) -> Pdu {
    tokio::time::timeout(Duration::from_secs(2), connection.outgoing(destination).pop())
        .await
        .expect("PDU not delivered in time")
        .expect("queue closed")
}

async fn open_connection(orchestrator: &Orchestrator) -> (CoreHelper, Arc<ConnectionManager>, Arc<Connection>) {
    let helper = orchestrator.helper().await.unwrap();
    let proxies = orchestrator.proxy_manager().await.unwrap();
    let connections = Arc::clone(proxies.get("loopback").unwrap().connection_manager());

    let connection = Arc::new(Connection::new(connections.next_id(), "loopback", None));
    connections.add(Arc::clone(&connection));
    (helper, connections, connection)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_message_reaches_its_peer_in_order() {
    let (c2s, c2s_count) = counting("c2s");
    let (s2c, s2c_count) = counting("s2c");
    let orchestrator = Orchestrator::new(vec![Arc::new(LoopbackModule)], vec![c2s], vec![s2c]);

    let listener = Arc::new(RecordingListener::default());
    let registered: Arc<dyn ConnectionListener> = listener.clone();
    orchestrator.register_connection_listener(&registered);

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.state(), CoreState::Started);

    let (helper, connections, connection) = open_connection(&orchestrator).await;
    assert_eq!(listener.started.load(Ordering::SeqCst), 1);

    let client_messages: Vec<Vec<u8>> = vec![
        b"USER test\r\n".to_vec(),
        Vec::new(),
        b"PASS secret\r\n".to_vec(),
        vec![0u8, 1, 2, 255],
    ];
    let server_messages: Vec<Vec<u8>> = vec![
        b"220 ready\r\n".to_vec(),
        b"331 password required\r\n".to_vec(),
        Vec::new(),
        b"230 logged in\r\n".to_vec(),
        vec![0xde, 0xad, 0xbe, 0xef],
        b"221 bye\r\n".to_vec(),
    ];

    // Interleave both directions like two reader loops would
    for index in 0..server_messages.len() {
        if let Some(data) = client_messages.get(index) {
            helper.process(Pdu::new(Arc::clone(&connection), PduDestination::Server, data.clone()));
        }
        helper.process(Pdu::new(
            Arc::clone(&connection),
            PduDestination::Client,
            server_messages[index].clone(),
        ));
    }

    for expected in &client_messages {
        let pdu = next(&connection, PduDestination::Server).await;
        assert_eq!(pdu.data(), expected.as_slice());
        assert_eq!(pdu.last_interceptor().unwrap().code.as_ref(), "c2s");
    }
    for expected in &server_messages {
        let pdu = next(&connection, PduDestination::Client).await;
        assert_eq!(pdu.data(), expected.as_slice());
        assert_eq!(pdu.last_interceptor().unwrap().code.as_ref(), "s2c");
    }

    assert_eq!(c2s_count.load(Ordering::SeqCst), client_messages.len());
    assert_eq!(s2c_count.load(Ordering::SeqCst), server_messages.len());

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), CoreState::Stopped);
    assert!(connections.is_empty());
    assert!(connection.is_closing());
    assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_pdu_skips_later_stages() {
    let (after, after_count) = counting("after");
    let orchestrator = Orchestrator::new(
        vec![Arc::new(LoopbackModule)],
        vec![Arc::new(TagDropModule), after],
        Vec::new(),
    );
    orchestrator.start().await.unwrap();
    let (helper, _, connection) = open_connection(&orchestrator).await;

    let mut dropped = Pdu::new(Arc::clone(&connection), PduDestination::Server, b"dropped".to_vec());
    dropped.add_tag("drop");
    helper.process(dropped);
    helper.process(Pdu::new(Arc::clone(&connection), PduDestination::Server, b"kept".to_vec()));

    let pdu = next(&connection, PduDestination::Server).await;
    assert_eq!(pdu.data(), b"kept");
    assert_eq!(after_count.load(Ordering::SeqCst), 1);
    assert!(connection.outgoing(PduDestination::Server).try_pop().is_none());

    orchestrator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reprocessed_pdu_resumes_after_its_last_interceptor() {
    let (first, first_count) = counting("first");
    let (second, second_count) = counting("second");
    let orchestrator = Orchestrator::new(vec![Arc::new(LoopbackModule)], vec![first, second], Vec::new());
    orchestrator.start().await.unwrap();
    let (helper, _, connection) = open_connection(&orchestrator).await;

    helper.process(Pdu::new(Arc::clone(&connection), PduDestination::Server, b"once".to_vec()));
    let mut pdu = next(&connection, PduDestination::Server).await;
    assert_eq!(pdu.last_interceptor().unwrap().index, 1);

    // Re-submitting after the second stage goes straight to the connection
    pdu.set_data(b"again".to_vec());
    helper.process(pdu);
    let pdu = next(&connection, PduDestination::Server).await;
    assert_eq!(pdu.data(), b"again");
    assert_eq!(first_count.load(Ordering::SeqCst), 1);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);

    // Entering at a given stage runs only the stages from there on
    helper
        .process_from(Pdu::new(Arc::clone(&connection), PduDestination::Server, b"late".to_vec()), 1)
        .unwrap();
    next(&connection, PduDestination::Server).await;
    assert_eq!(first_count.load(Ordering::SeqCst), 1);
    assert_eq!(second_count.load(Ordering::SeqCst), 2);

    orchestrator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_run_gets_fresh_interceptors() {
    let (module, count) = counting("count");
    let orchestrator = Orchestrator::new(vec![Arc::new(LoopbackModule)], vec![module], Vec::new());

    for run in 1..=2 {
        orchestrator.start().await.unwrap();
        let (helper, _, connection) = open_connection(&orchestrator).await;
        helper.process(Pdu::new(Arc::clone(&connection), PduDestination::Server, vec![run]));
        assert_eq!(next(&connection, PduDestination::Server).await.data(), &[run]);
        orchestrator.stop().await;
    }

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

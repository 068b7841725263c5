//! TCP proxy
//!
//! Plain TCP, TLS on either leg, or STARTTLS. TLS material is loaded once in `prepare`,
//! the listener is bound in `start`.

mod forwarder;
mod handler;
mod server;
mod stream;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info};
use openssl::ssl::{SslAcceptor, SslConnector};
use tokio::task::JoinHandle;

use crate::common::sync::lock;
use crate::common::{parse_socket_addr, ProxyError, Result};
use crate::config::TcpProxyConfig;
use crate::connection::ConnectionManager;
use crate::core::CoreHelper;
use crate::tls::{create_tls_acceptor, create_trusting_connector};

use super::{Proxy, ProxyModule};

pub use forwarder::STARTTLS_TAG;
pub use stream::{Rewind, Stream};

/// Settings and resources shared by every connection of one proxy
pub(crate) struct ConnectionContext {
    pub code: Arc<str>,
    pub listen: SocketAddr,
    pub target: String,
    pub buffer_size: usize,
    pub charset: String,
    pub close_delay: Duration,
    pub connect_timeout: Duration,
    pub starttls: bool,
    /// Identity presented to clients
    pub server_tls: Option<SslAcceptor>,
    /// Trust-everyone connector towards the target
    pub client_tls: Option<SslConnector>,
    pub helper: CoreHelper,
    pub connections: Arc<ConnectionManager>,
}

struct Listening {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// TCP proxy of one run
pub struct TcpProxy {
    config: TcpProxyConfig,
    code: Arc<str>,
    helper: CoreHelper,
    connections: Arc<ConnectionManager>,
    context: Mutex<Option<Arc<ConnectionContext>>>,
    listening: Mutex<Option<Listening>>,
}

impl TcpProxy {
    /// Create a proxy; nothing is loaded or bound yet
    pub fn new(config: TcpProxyConfig, helper: CoreHelper) -> Self {
        let code: Arc<str> = Arc::from(config.code.as_str());
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&code),
            Arc::clone(helper.connection_listeners()),
        ));

        Self {
            config,
            code,
            helper,
            connections,
            context: Mutex::new(None),
            listening: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TcpProxyConfig {
        &self.config
    }

    fn load_context(&self) -> Result<ConnectionContext> {
        let config = &self.config;
        if config.buffer_size == 0 {
            return Err(ProxyError::Config(format!("Proxy {}: buffer size must be greater than 0", config.code)));
        }

        let listen = parse_socket_addr(&config.listen)?;
        if config.target.rsplit_once(':').is_none() {
            return Err(ProxyError::Config(format!(
                "Proxy {}: target must be host:port, got {}",
                config.code, config.target
            )));
        }

        if config.starttls && config.server_tls.is_none() {
            return Err(ProxyError::Config(format!("Proxy {}: starttls requires server_tls", config.code)));
        }

        let server_tls = config.server_tls.as_ref().map(create_tls_acceptor).transpose()?;
        let client_tls = if config.client_tls.is_some() || config.starttls {
            Some(create_trusting_connector(config.client_tls.as_ref())?)
        } else {
            None
        };

        Ok(ConnectionContext {
            code: Arc::clone(&self.code),
            listen,
            target: config.target.clone(),
            buffer_size: config.buffer_size,
            charset: config.charset.clone(),
            close_delay: Duration::from_millis(config.connection_close_delay),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            starttls: config.starttls,
            server_tls,
            client_tls,
            helper: self.helper.clone(),
            connections: Arc::clone(&self.connections),
        })
    }

    fn listen(&self) -> Result<Listening> {
        let ctx = lock(&self.context)
            .clone()
            .ok_or_else(|| ProxyError::Lifecycle(format!("Proxy {} started before prepare", self.code)))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProxyError::Lifecycle(format!("Proxy {} needs a tokio runtime: {}", self.code, e)))?;

        let _guard = runtime.enter();
        let listener = server::bind(ctx.listen)?;
        let local_addr = listener.local_addr()?;
        let task = runtime.spawn(server::accept_loop(listener, ctx));

        Ok(Listening { local_addr, task })
    }
}

impl Proxy for TcpProxy {
    fn code(&self) -> &str {
        &self.code
    }

    fn prepare(&self) -> bool {
        match self.load_context() {
            Ok(ctx) => {
                *lock(&self.context) = Some(Arc::new(ctx));
                true
            }
            Err(e) => {
                error!("Proxy {} failed to prepare: {}", self.code, e);
                false
            }
        }
    }

    fn start(&self) -> bool {
        match self.listen() {
            Ok(listening) => {
                info!(
                    "Proxy {} listening on {}, forwarding to {}",
                    self.code, listening.local_addr, self.config.target
                );
                *lock(&self.listening) = Some(listening);
                true
            }
            Err(e) => {
                error!("Proxy {} failed to start: {}", self.code, e);
                false
            }
        }
    }

    fn stop(&self) {
        if let Some(listening) = lock(&self.listening).take() {
            listening.task.abort();
            info!("Proxy {} stopped listening on {}", self.code, listening.local_addr);
        }
        self.connections.stop();
    }

    fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.listening).as_ref().map(|listening| listening.local_addr)
    }
}

/// Module creating a `TcpProxy` for every run
#[derive(Debug, Clone)]
pub struct TcpProxyModule {
    config: TcpProxyConfig,
}

impl TcpProxyModule {
    pub fn new(config: TcpProxyConfig) -> Self {
        Self { config }
    }
}

impl ProxyModule for TcpProxyModule {
    fn code(&self) -> &str {
        &self.config.code
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn create_proxy(&self, helper: &CoreHelper) -> Result<Arc<dyn Proxy>> {
        Ok(Arc::new(TcpProxy::new(self.config.clone(), helper.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreState, ListenerRegistry};
    use crate::interceptor::Pipeline;
    use crate::pdu::PduDestination;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::watch;

    fn helper() -> CoreHelper {
        let (_tx, rx) = watch::channel(CoreState::Starting);
        CoreHelper::new(
            Arc::new(Pipeline::new(PduDestination::Server, 0)),
            Arc::new(Pipeline::new(PduDestination::Client, 0)),
            Arc::new(ListenerRegistry::new()),
            rx,
        )
    }

    fn config(target: &str) -> TcpProxyConfig {
        TcpProxyConfig {
            listen: "127.0.0.1:0".to_string(),
            target: target.to_string(),
            connection_close_delay: 10,
            ..TcpProxyConfig::default()
        }
    }

    #[test]
    fn test_prepare_rejects_bad_addresses() {
        let proxy = TcpProxy::new(
            TcpProxyConfig {
                listen: "not an address".to_string(),
                ..config("127.0.0.1:9")
            },
            helper(),
        );
        assert!(!proxy.prepare());

        let proxy = TcpProxy::new(config("no-port"), helper());
        assert!(!proxy.prepare());
    }

    #[test]
    fn test_start_before_prepare_fails() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let proxy = TcpProxy::new(config("127.0.0.1:9"), helper());
        assert!(!proxy.start());
        proxy.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forwards_both_directions_without_interceptors() {
        let target = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        let echo = tokio::spawn(async move {
            let (mut socket, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let helper = helper();
        let c2s = Arc::clone(helper.pipeline(PduDestination::Server));
        let s2c = Arc::clone(helper.pipeline(PduDestination::Client));
        // Zero-stage pipelines: forward straight from the entry queue
        let forward = |pipeline: Arc<Pipeline>| {
            tokio::spawn(async move {
                while let Some(pdu) = pipeline.entry().pop().await {
                    let connection = Arc::clone(pdu.connection());
                    connection.send(pdu);
                }
            })
        };
        let forwarders = [forward(c2s), forward(s2c)];

        let proxy = Arc::new(TcpProxy::new(config(&target_addr.to_string()), helper));
        let started = {
            let proxy = Arc::clone(&proxy);
            tokio::task::spawn_blocking(move || proxy.prepare() && proxy.start()).await.unwrap()
        };
        assert!(started);

        let mut client = tokio::net::TcpStream::connect(proxy.local_addr().unwrap()).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"hello");
        assert_eq!(proxy.connection_manager().len(), 1);

        echo.await.unwrap();
        proxy.stop();
        assert!(proxy.connection_manager().is_empty());
        for forwarder in forwarders {
            forwarder.abort();
        }
    }
}

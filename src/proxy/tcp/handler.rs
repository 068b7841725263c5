//! Connection handler module
//!
//! Sets up one accepted client connection and supervises it until it closes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use crate::common::{host_of, ProxyError, Result};
use crate::connection::Connection;
use crate::tls;

use super::forwarder::spawn_loops;
use super::stream::{Rewind, Stream};
use super::ConnectionContext;

/// Handle a single client connection
///
/// Errors end the connection; transport closes are logged at debug level only.
///
/// # Parameters
///
/// * `client_stream` - Accepted client TCP stream
/// * `peer` - Client address
/// * `ctx` - Settings and resources shared by the connections of one proxy
pub(super) async fn handle_connection(client_stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    match run_connection(client_stream, peer, &ctx).await {
        Ok(()) => {}
        Err(e) if e.is_connection_closed() => debug!("[{}] connection from {} closed early: {}", ctx.code, peer, e),
        Err(e) => warn!("[{}] connection from {} failed: {}", ctx.code, peer, e),
    }
}

async fn run_connection(client_stream: TcpStream, peer: SocketAddr, ctx: &Arc<ConnectionContext>) -> Result<()> {
    let _ = client_stream.set_nodelay(true);

    // Client-facing TLS up front, unless the client upgrades later
    let client = match (&ctx.server_tls, ctx.starttls) {
        (Some(acceptor), false) => {
            let handshake = tls::accept(acceptor, Rewind::new(Bytes::new(), client_stream));
            Stream::TlsServer(timeout(ctx.connect_timeout, handshake).await.map_err(|_| timed_out("Client TLS handshake"))??)
        }
        _ => Stream::Plain(client_stream),
    };

    let target_stream = timeout(ctx.connect_timeout, TcpStream::connect(ctx.target.as_str()))
        .await
        .map_err(|_| timed_out("Connection to target"))??;
    let _ = target_stream.set_nodelay(true);

    let server = match (&ctx.client_tls, ctx.starttls) {
        (Some(connector), false) => {
            let handshake = tls::connect(connector, host_of(&ctx.target), target_stream);
            Stream::TlsClient(timeout(ctx.connect_timeout, handshake).await.map_err(|_| timed_out("Target TLS handshake"))??)
        }
        _ => Stream::Plain(target_stream),
    };

    let connection = Arc::new(Connection::new(ctx.connections.next_id(), Arc::clone(&ctx.code), Some(peer)));
    debug!("[{}] {} -> {} ({} / {})", connection, peer, ctx.target, client.kind(), server.kind());
    if !ctx.connections.add(Arc::clone(&connection)) {
        return Ok(());
    }

    let (closed_tx, mut closed_rx) = mpsc::channel(2);
    spawn_loops(&connection, client, server, ctx, closed_tx);

    // Either side closing ends the connection, after a grace period for in-flight PDUs
    if let Some(side) = closed_rx.recv().await {
        debug!("[{}] {:?} side finished, closing in {:?}", connection, side, ctx.close_delay);
    }
    sleep(ctx.close_delay).await;

    connection.stop();
    ctx.connections.remove(connection.id());
    Ok(())
}

fn timed_out(what: &str) -> ProxyError {
    ProxyError::Io(io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what)))
}

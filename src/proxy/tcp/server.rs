//! Accept loop of a TCP proxy

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::common::Result;

use super::handler::handle_connection;
use super::ConnectionContext;

/// Pending connection backlog of the listening socket
const LISTEN_BACKLOG: i32 = 1024;

/// Bind a listening socket
///
/// Must be called from within a tokio runtime.
///
/// # Parameters
///
/// * `addr` - Address to bind; port 0 picks a free port
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub(super) fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Accept connections until the task is aborted
///
/// Aborting the loop drops the listener and every connection handler it spawned.
pub(super) async fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>) {
    let mut tasks = JoinSet::new();

    loop {
        // Reap finished handlers and report panics
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!("[{}] connection task error: {}", ctx.code, e);
            }
        }

        match listener.accept().await {
            Ok((client_stream, peer)) => {
                debug!("[{}] accepted connection from {}", ctx.code, peer);
                tasks.spawn(handle_connection(client_stream, peer, Arc::clone(&ctx)));
            }
            Err(e) => {
                error!("[{}] error accepting connection: {}", ctx.code, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

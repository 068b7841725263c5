//! Transport loops of a TCP connection
//!
//! Every connection runs four loops: a reader and a writer per leg. Readers turn each
//! read into a PDU and submit it to the pipeline; writers drain the connection's outgoing
//! queues. A STARTTLS upgrade needs both halves of a leg, so the loop performing it borrows
//! the other half from its sibling loop and hands the upgraded half back.

use std::future::Future;
use std::io;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::common::host_of;
use crate::connection::Connection;
use crate::pdu::{Pdu, PduDestination};
use crate::protocol::is_tls_handshake;
use crate::tls;

use super::stream::{Rewind, Stream};
use super::ConnectionContext;

/// Tag of the empty PDU announcing a STARTTLS upgrade towards the server
pub const STARTTLS_TAG: &str = "starttls";

type Reader = ReadHalf<Stream>;
type Writer = WriteHalf<Stream>;

/// Request to lend a stream half to the sibling loop of the same leg
struct Lend<T> {
    give: oneshot::Sender<T>,
    back: oneshot::Receiver<T>,
}

impl<T> Lend<T> {
    /// Hand `half` over and wait for its replacement
    async fn exchange(self, half: T) -> Option<T> {
        self.give.send(half).ok()?;
        self.back.await.ok()
    }
}

/// Borrow a half from the sibling loop; the returned sender gives the replacement back
async fn borrow<T>(lender: &mpsc::Sender<Lend<T>>) -> Option<(T, oneshot::Sender<T>)> {
    let (give, taken) = oneshot::channel();
    let (returned, back) = oneshot::channel();
    lender.send(Lend { give, back }).await.ok()?;
    let half = taken.await.ok()?;
    Some((half, returned))
}

enum Event<T, L> {
    Ready(T),
    Lend(Option<Lend<L>>),
}

/// Wait for `ready`, or for a lend request when the loop still accepts one
async fn next_event<F, L>(ready: F, requests: &mut Option<mpsc::Receiver<Lend<L>>>) -> Event<F::Output, L>
where
    F: Future,
{
    match requests.as_mut() {
        Some(requests) => tokio::select! {
            request = requests.recv() => Event::Lend(request),
            output = ready => Event::Ready(output),
        },
        None => Event::Ready(ready.await),
    }
}

/// Spawn the four loops of `connection` onto it
///
/// `closed` receives one message per reader loop that finished.
pub(super) fn spawn_loops(
    connection: &Arc<Connection>,
    client: Stream,
    server: Stream,
    ctx: &Arc<ConnectionContext>,
    closed: mpsc::Sender<PduDestination>,
) {
    let upgradable = ctx.starttls && client.is_plain() && server.is_plain();
    let (client_reader, client_writer) = split(client);
    let (server_reader, server_writer) = split(server);

    let (client_writer_lender, client_writer_requests) = lend_channel(upgradable);
    let (server_reader_lender, server_reader_requests) = lend_channel(upgradable);

    connection.spawn(read_client(
        client_reader,
        Arc::clone(connection),
        Arc::clone(ctx),
        client_writer_lender,
        closed.clone(),
    ));
    connection.spawn(read_server(
        server_reader,
        Arc::clone(connection),
        Arc::clone(ctx),
        server_reader_requests,
        closed,
    ));
    connection.spawn(write_client(client_writer, Arc::clone(connection), client_writer_requests));
    connection.spawn(write_server(
        server_writer,
        Arc::clone(connection),
        Arc::clone(ctx),
        server_reader_lender,
    ));
}

fn lend_channel<T>(enabled: bool) -> (Option<mpsc::Sender<Lend<T>>>, Option<mpsc::Receiver<Lend<T>>>) {
    if !enabled {
        return (None, None);
    }
    let (tx, rx) = mpsc::channel(1);
    (Some(tx), Some(rx))
}

/// Build a PDU from one read and submit it to the pipeline
fn submit(connection: &Arc<Connection>, ctx: &ConnectionContext, destination: PduDestination, data: &[u8]) {
    let mut pdu = Pdu::new(Arc::clone(connection), destination, data.to_vec());
    pdu.set_charset(ctx.charset.as_str());
    trace!("[{}] captured {} PDU ({} bytes)", connection, destination, data.len());
    ctx.helper.process(pdu);
}

async fn write_pdu(writer: &mut Writer, pdu: &Pdu) -> io::Result<()> {
    writer.write_all(pdu.data()).await?;
    writer.flush().await
}

async fn read_client(
    mut reader: Reader,
    connection: Arc<Connection>,
    ctx: Arc<ConnectionContext>,
    mut upgrade: Option<mpsc::Sender<Lend<Writer>>>,
    closed: mpsc::Sender<PduDestination>,
) {
    let mut buffer = vec![0u8; ctx.buffer_size];
    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("[{}] client read ended: {}", connection, e);
                break;
            }
        };

        if upgrade.is_some() && is_tls_handshake(&buffer[..n]) {
            let Some(lender) = upgrade.take() else { break };
            match upgrade_client(reader, &lender, &buffer[..n], &connection, &ctx).await {
                Some(upgraded) => {
                    reader = upgraded;
                    continue;
                }
                None => break,
            }
        }

        submit(&connection, &ctx, PduDestination::Server, &buffer[..n]);
    }

    debug!("[{}] client side closed", connection);
    let _ = closed.try_send(PduDestination::Client);
}

/// Upgrade the client leg in place; `hello` is replayed into the TLS acceptor
async fn upgrade_client(
    reader: Reader,
    lender: &mpsc::Sender<Lend<Writer>>,
    hello: &[u8],
    connection: &Arc<Connection>,
    ctx: &ConnectionContext,
) -> Option<Reader> {
    let acceptor = ctx.server_tls.as_ref()?;
    info!("[{}] client started a TLS handshake, upgrading connection", connection);

    let mut marker = Pdu::new(Arc::clone(connection), PduDestination::Server, Vec::new());
    marker.set_charset(ctx.charset.as_str());
    marker.add_tag(STARTTLS_TAG);
    ctx.helper.process(marker);

    let (writer, back) = borrow(lender).await?;
    let tcp = reader.unsplit(writer).into_plain()?;
    match tls::accept(acceptor, Rewind::new(hello.to_vec(), tcp)).await {
        Ok(stream) => {
            let (reader, writer) = split(Stream::TlsServer(stream));
            back.send(writer).ok()?;
            Some(reader)
        }
        Err(e) => {
            warn!("[{}] STARTTLS handshake with client failed: {}", connection, e);
            None
        }
    }
}

async fn read_server(
    mut reader: Reader,
    connection: Arc<Connection>,
    ctx: Arc<ConnectionContext>,
    mut requests: Option<mpsc::Receiver<Lend<Reader>>>,
    closed: mpsc::Sender<PduDestination>,
) {
    let mut buffer = vec![0u8; ctx.buffer_size];
    loop {
        match next_event(reader.read(&mut buffer), &mut requests).await {
            Event::Ready(Ok(0)) => break,
            Event::Ready(Ok(n)) => submit(&connection, &ctx, PduDestination::Client, &buffer[..n]),
            Event::Ready(Err(e)) => {
                debug!("[{}] server read ended: {}", connection, e);
                break;
            }
            Event::Lend(Some(lend)) => {
                // A leg is upgraded at most once
                requests = None;
                match lend.exchange(reader).await {
                    Some(upgraded) => reader = upgraded,
                    None => break,
                }
            }
            Event::Lend(None) => requests = None,
        }
    }

    debug!("[{}] server side closed", connection);
    let _ = closed.try_send(PduDestination::Server);
}

async fn write_client(mut writer: Writer, connection: Arc<Connection>, mut requests: Option<mpsc::Receiver<Lend<Writer>>>) {
    let queue = connection.outgoing(PduDestination::Client);
    loop {
        match next_event(queue.pop(), &mut requests).await {
            Event::Ready(Some(pdu)) => {
                if let Err(e) = write_pdu(&mut writer, &pdu).await {
                    debug!("[{}] client write ended: {}", connection, e);
                    break;
                }
            }
            Event::Ready(None) => break,
            Event::Lend(Some(lend)) => {
                requests = None;
                match lend.exchange(writer).await {
                    Some(upgraded) => writer = upgraded,
                    None => break,
                }
            }
            Event::Lend(None) => requests = None,
        }
    }
}

async fn write_server(
    mut writer: Writer,
    connection: Arc<Connection>,
    ctx: Arc<ConnectionContext>,
    mut upgrade: Option<mpsc::Sender<Lend<Reader>>>,
) {
    let queue = connection.outgoing(PduDestination::Server);
    while let Some(pdu) = queue.pop().await {
        if upgrade.is_some() && pdu.is_empty() && pdu.has_tag(STARTTLS_TAG) {
            let Some(lender) = upgrade.take() else { break };
            match upgrade_server(writer, &lender, &connection, &ctx).await {
                Some(upgraded) => writer = upgraded,
                None => break,
            }
            continue;
        }

        if let Err(e) = write_pdu(&mut writer, &pdu).await {
            debug!("[{}] server write ended: {}", connection, e);
            break;
        }
    }
}

/// Upgrade the server leg in place to a TLS client session
async fn upgrade_server(
    writer: Writer,
    lender: &mpsc::Sender<Lend<Reader>>,
    connection: &Arc<Connection>,
    ctx: &ConnectionContext,
) -> Option<Writer> {
    let connector = ctx.client_tls.as_ref()?;
    let (reader, back) = borrow(lender).await?;
    let tcp = reader.unsplit(writer).into_plain()?;

    match tls::connect(connector, host_of(&ctx.target), tcp).await {
        Ok(stream) => {
            info!("[{}] server side upgraded to TLS", connection);
            let (reader, writer) = split(Stream::TlsClient(stream));
            back.send(reader).ok()?;
            Some(writer)
        }
        Err(e) => {
            warn!("[{}] STARTTLS handshake with server failed: {}", connection, e);
            None
        }
    }
}

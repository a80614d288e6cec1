use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use yamux::{Config, Connection, ConnectionError, Mode, Stream as YamuxStream};

/// The concrete stream type handed back by [`Session`]: a yamux stream
/// bridged onto tokio's `AsyncRead`/`AsyncWrite` traits via `tokio_util`'s
/// compatibility adapter, since `yamux` itself is built on the `futures`
/// crate's I/O traits.
pub type WireStream = Compat<YamuxStream>;

/// Drives a [`yamux::Connection`] in the background and exposes the
/// blocking-shaped `accept`/`open` primitives the named-stream manager polls
/// on top of, the same way the reference implementation's manager sits on
/// top of a bare `smux.Session`.
///
/// The driver task also watches `cancel`: once it fires, the task stops
/// polling the connection and returns, dropping the underlying transport
/// connection and thereby every yamux stream multiplexed over it. This is
/// the manager supervisor the reference implementation runs as a goroutine
/// watching `ctx.Done()`.
///
/// `yamux`'s `Connection` is not shareable across tasks, so outbound opens
/// and the close handshake are relayed into the driver task through request
/// channels rather than through a separate control handle.
pub struct Session {
    open_tx: mpsc::Sender<oneshot::Sender<Result<YamuxStream, ConnectionError>>>,
    close_tx: mpsc::Sender<oneshot::Sender<Result<(), ConnectionError>>>,
    incoming: mpsc::Receiver<io::Result<YamuxStream>>,
    driver: JoinHandle<()>,
}

impl Session {
    pub fn new<S>(socket: S, mode: Mode, cancel: CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = Connection::new(socket.compat(), Config::default(), mode);
        let (incoming_tx, incoming) = mpsc::channel(32);
        let (open_tx, open_rx) = mpsc::channel(32);
        let (close_tx, close_rx) = mpsc::channel(1);

        let driver = tokio::spawn(run_driver(connection, incoming_tx, open_rx, close_rx, cancel));

        Self {
            open_tx,
            close_tx,
            incoming,
            driver,
        }
    }

    /// Accepts the next inbound yamux stream, with no notion of name yet.
    pub async fn accept(&mut self) -> io::Result<WireStream> {
        self.incoming
            .recv()
            .await
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::BrokenPipe, "session closed")))
            .map(FuturesAsyncReadCompatExt::compat)
    }

    /// Opens a new outbound yamux stream, with no notion of name yet.
    pub async fn open(&mut self) -> io::Result<WireStream> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.open_tx
            .send(reply_tx)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session closed"))?;
        reply_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session closed"))?
            .map(FuturesAsyncReadCompatExt::compat)
            .map_err(to_io_error)
    }

    pub async fn close(&mut self) -> io::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let result = if self.close_tx.send(reply_tx).await.is_ok() {
            reply_rx.await.unwrap_or(Ok(())).map_err(to_io_error)
        } else {
            Ok(())
        };
        self.driver.abort();
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn run_driver<S>(
    mut connection: Connection<Compat<S>>,
    incoming_tx: mpsc::Sender<io::Result<YamuxStream>>,
    mut open_rx: mpsc::Receiver<oneshot::Sender<Result<YamuxStream, ConnectionError>>>,
    mut close_rx: mpsc::Receiver<oneshot::Sender<Result<(), ConnectionError>>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    use futures::future::poll_fn;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                log::debug!("multiplex::run_driver: cancelled, dropping connection");
                return;
            }
            next = poll_fn(|cx| connection.poll_next_inbound(cx)) => {
                match next {
                    Some(Ok(stream)) => {
                        if incoming_tx.send(Ok(stream)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        let _ = incoming_tx.send(Err(to_io_error(err))).await;
                        return;
                    }
                    None => return,
                }
            }
            Some(reply) = open_rx.recv() => {
                let result = poll_fn(|cx| connection.poll_new_outbound(cx)).await;
                let _ = reply.send(result);
            }
            Some(reply) = close_rx.recv() => {
                let result = poll_fn(|cx| connection.poll_close(cx)).await;
                let _ = reply.send(result);
                return;
            }
        }
    }
}

fn to_io_error(err: yamux::ConnectionError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

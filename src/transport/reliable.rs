use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio_kcp::{KcpConfig, KcpListener, KcpNoDelayConfig, KcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// KCP window/no-delay tuning, exposed so callers can trade latency for CPU
/// (or vice versa) instead of living with the reference implementation's
/// hardcoded constants.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    pub mtu: usize,
    pub send_window: u16,
    pub recv_window: u16,
    pub nodelay: bool,
    pub interval: i32,
    pub resend: i32,
    pub no_congestion_control: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: 1400,
            send_window: 512,
            recv_window: 512,
            nodelay: true,
            interval: 40,
            resend: 2,
            no_congestion_control: true,
        }
    }
}

impl TransportConfig {
    fn to_kcp_config(self) -> KcpConfig {
        let mut config = KcpConfig::default();
        config.mtu = self.mtu;
        config.wnd_size = (self.send_window, self.recv_window);
        config.nodelay = KcpNoDelayConfig {
            nodelay: self.nodelay,
            interval: self.interval,
            resend: self.resend,
            nc: self.no_congestion_control,
        };
        config
    }
}

/// A single reliable-over-UDP connection, either dialed or accepted.
///
/// Cooperatively cancellable: once `cancel` fires, further reads/writes
/// return an error instead of touching the socket, mirroring the reference
/// implementation's `ctx.Done()` check ahead of every `Read`/`Write`.
pub struct Connection {
    inner: KcpStream,
    cancel: CancellationToken,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl Connection {
    fn new(inner: KcpStream, cancel: CancellationToken, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self { inner, cancel, local_addr, remote_addr }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.remote_addr)
    }
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "context cancelled")
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Err(cancelled_error()));
        }
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Err(cancelled_error()));
        }
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Dials a reliable-over-UDP endpoint. The returned [`Connection`] checks
/// `cancel` ahead of every read/write and fails them once it fires; actual
/// teardown of the socket happens one layer up, in the multiplex session
/// that owns this connection.
pub async fn dial(
    addr: SocketAddr,
    config: TransportConfig,
    cancel: CancellationToken,
) -> Result<Connection, TransportError> {
    log::debug!("transport::dial: connecting to {addr}");
    let udp = match addr.ip() {
        IpAddr::V4(..) => UdpSocket::bind("0.0.0.0:0").await,
        IpAddr::V6(..) => UdpSocket::bind("[::]:0").await,
    }
    .map_err(|e| TransportError::BadAddr(e))?;
    let local_addr = udp.local_addr().map_err(|e| TransportError::BadAddr(e))?;
    let stream = KcpStream::connect_with_socket(&config.to_kcp_config(), udp, addr)
        .await
        .map_err(|e| TransportError::BadAddr(io::Error::new(io::ErrorKind::Other, e)))?;
    log::debug!("transport::dial: connected to {addr}");

    Ok(Connection::new(stream, cancel, local_addr, addr))
}

/// A listener for incoming reliable-over-UDP connections.
pub struct Listener {
    inner: KcpListener,
    cancel: CancellationToken,
}

impl Listener {
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        log::debug!("transport::Listener::bind: listening on {addr}");
        let inner = KcpListener::bind(config.to_kcp_config(), addr)
            .await
            .map_err(|e| TransportError::BadAddr(io::Error::new(io::ErrorKind::Other, e)))?;
        Ok(Self { inner, cancel })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn accept(&mut self) -> Result<(Connection, SocketAddr), TransportError> {
        log::debug!("transport::Listener::accept: accepting connection");
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|e| TransportError::Accept(io::Error::new(io::ErrorKind::Other, e)))?;
        log::debug!("transport::Listener::accept: accepted connection from {peer}");

        let local_addr = self.inner.local_addr()?;
        Ok((Connection::new(stream, self.cancel.clone(), local_addr, peer), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_tuning() {
        let config = TransportConfig::default();
        assert_eq!(config.send_window, 512);
        assert_eq!(config.recv_window, 512);
        assert!(config.nodelay);
    }
}

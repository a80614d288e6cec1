use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::multiplex::session::WireStream;
use crate::transfer::{self, StreamedEncryptedReceiver, StreamedEncryptedSender, StreamedReceiver, StreamedSender};

/// A named, authenticated-or-not application stream. Thin delegation to
/// [`crate::transfer`] over the underlying multiplexed stream, exactly like
/// the reference implementation's stream type forwards to its transfer
/// package with `s.aesKey` pinned in.
///
/// Every poll checks `cancel` first and fails fast once it fires. There is
/// no per-stream supervisor task: the owning [`crate::multiplex::Session`]
/// watches the same token and drops the whole multiplexed connection when
/// it fires, which tears down every live stream at once (the reference
/// implementation instead spawns one goroutine per stream to call
/// `wrapped.Close()`, since `smux` streams there are independently
/// closeable from another goroutine).
pub struct Stream {
    pub(crate) inner: WireStream,
    pub(crate) aes_key: Option<Vec<u8>>,
    pub(crate) cancel: CancellationToken,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl Stream {
    pub(crate) fn new(
        inner: WireStream,
        aes_key: Option<Vec<u8>>,
        cancel: CancellationToken,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        Self { inner, aes_key, cancel, local_addr, remote_addr }
    }

    /// The local address of the underlying reliable-over-UDP connection
    /// this stream is multiplexed over.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The peer address of the underlying reliable-over-UDP connection
    /// this stream is multiplexed over.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransferError> {
        transfer::send(self, data, timeout).await
    }

    pub async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransferError> {
        transfer::receive(self, buf, timeout).await
    }

    pub async fn send_serialized(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransferError> {
        transfer::send_serialized(self, data, timeout).await
    }

    pub async fn receive_serialized(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransferError> {
        transfer::receive_serialized(self, max_len, timeout).await
    }

    pub async fn send_encrypted(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransferError> {
        let key = self.aes_key.clone();
        transfer::send_encrypted(self, data, key.as_deref(), timeout).await
    }

    pub async fn receive_encrypted(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransferError> {
        let key = self.aes_key.clone();
        transfer::receive_encrypted(self, key.as_deref(), max_len, timeout).await
    }

    pub fn streamed_sender(&mut self, timeout: Duration) -> StreamedSender<'_, Self> {
        StreamedSender::new(self, timeout)
    }

    pub fn streamed_receiver(&mut self, timeout: Duration) -> StreamedReceiver<'_, Self> {
        StreamedReceiver::new(self, timeout)
    }

    pub async fn streamed_encrypted_sender(
        &mut self,
        timeout: Duration,
    ) -> Result<StreamedEncryptedSender<'_, Self>, TransferError> {
        let key = self.aes_key.clone().ok_or(TransferError::AesKey)?;
        StreamedEncryptedSender::new(self, &key, timeout).await
    }

    pub async fn streamed_encrypted_receiver(
        &mut self,
        timeout: Duration,
    ) -> Result<StreamedEncryptedReceiver<'_, Self>, TransferError> {
        let key = self.aes_key.clone().ok_or(TransferError::AesKey)?;
        StreamedEncryptedReceiver::new(self, &key, timeout).await
    }

    pub async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "context cancelled")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "context cancelled")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

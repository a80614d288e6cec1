//! Length-prefixed and streamed data transfer over any async byte stream.
//!
//! Every operation here accepts a `timeout`; `Duration::ZERO` means "wait
//! forever", matching the reference implementation's `timeout > 0` checks
//! around `SetReadDeadline`/`SetWriteDeadline`. We get the same "set a
//! deadline for this one operation, then clear it" behavior for free by
//! scoping a `tokio::time::timeout` around a single read/write future
//! instead of mutating deadline state on the socket.

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{self, Aes256Ctr};
use crate::error::TransferError;

const LENGTH_HEADER_SIZE: usize = 8;
const STREAM_IV_SIZE: usize = 16;

async fn with_timeout<F, T>(timeout: Duration, fut: F) -> Result<T, TransferError>
where
    F: std::future::Future<Output = T>,
{
    if timeout.is_zero() {
        Ok(fut.await)
    } else {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| TransferError::Timeout)
    }
}

/// Writes `data` to `stream`, failing if not all bytes could be written
/// within `timeout`.
pub async fn send<S: AsyncWrite + Unpin>(
    stream: &mut S,
    data: &[u8],
    timeout: Duration,
) -> Result<(), TransferError> {
    with_timeout(timeout, stream.write_all(data))
        .await?
        .map_err(TransferError::Write)
}

/// Reads exactly `buf.len()` bytes from `stream`.
pub async fn receive<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), TransferError> {
    with_timeout(timeout, stream.read_exact(buf))
        .await?
        .map(|_| ())
        .map_err(TransferError::Read)
}

/// Sends `data` behind a big-endian `u64` length prefix.
pub async fn send_serialized<S: AsyncWrite + Unpin>(
    stream: &mut S,
    data: &[u8],
    timeout: Duration,
) -> Result<(), TransferError> {
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    BigEndian::write_u64(&mut header, data.len() as u64);

    send(stream, &header, timeout).await?;
    send(stream, data, timeout).await
}

/// Reads a big-endian `u64`-length-prefixed payload, rejecting payloads
/// larger than `max_len`.
pub async fn receive_serialized<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, TransferError> {
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    receive(stream, &mut header, timeout).await?;
    let length = BigEndian::read_u64(&header) as usize;

    if length > max_len {
        return Err(TransferError::SmallBuffer);
    }

    let mut data = vec![0u8; length];
    receive(stream, &mut data, timeout).await?;
    Ok(data)
}

/// Encrypts `data` with AES-256-GCM under `aes_key`, then sends it
/// length-prefixed.
pub async fn send_encrypted<S: AsyncWrite + Unpin>(
    stream: &mut S,
    data: &[u8],
    aes_key: Option<&[u8]>,
    timeout: Duration,
) -> Result<(), TransferError> {
    let aes_key = aes_key.ok_or(TransferError::AesKey)?;
    let ciphertext = crypto::encrypt_aes_gcm(data, aes_key)?;
    send_serialized(stream, &ciphertext, timeout).await
}

/// Receives a length-prefixed AES-256-GCM payload and decrypts it.
pub async fn receive_encrypted<S: AsyncRead + Unpin>(
    stream: &mut S,
    aes_key: Option<&[u8]>,
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, TransferError> {
    let aes_key = aes_key.ok_or(TransferError::AesKey)?;
    let ciphertext = receive_serialized(stream, max_len, timeout).await?;
    Ok(crypto::decrypt_aes_gcm(&ciphertext, aes_key)?)
}

/// A plain, timeout-scoped writer for direct streaming writes.
pub struct StreamedSender<'a, S> {
    inner: &'a mut S,
    timeout: Duration,
}

impl<'a, S: AsyncWrite + Unpin> StreamedSender<'a, S> {
    pub fn new(inner: &'a mut S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransferError> {
        send(self.inner, buf, self.timeout).await
    }
}

/// A plain, timeout-scoped reader for direct streaming reads.
pub struct StreamedReceiver<'a, S> {
    inner: &'a mut S,
    timeout: Duration,
}

impl<'a, S: AsyncRead + Unpin> StreamedReceiver<'a, S> {
    pub fn new(inner: &'a mut S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransferError> {
        receive(self.inner, buf, self.timeout).await
    }
}

/// Encrypts data with AES-256-CTR as it is written, prefixing the stream
/// with a freshly random 16-byte IV on construction.
pub struct StreamedEncryptedSender<'a, S> {
    sender: StreamedSender<'a, S>,
    cipher: Aes256Ctr,
}

impl<'a, S: AsyncWrite + Unpin> StreamedEncryptedSender<'a, S> {
    pub async fn new(
        inner: &'a mut S,
        aes_key: &[u8],
        timeout: Duration,
    ) -> Result<Self, TransferError> {
        let mut iv = [0u8; STREAM_IV_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut iv);

        let mut sender = StreamedSender::new(inner, timeout);
        sender.write_all(&iv).await?;

        let cipher = crypto::new_streamed_cipher(aes_key, &iv)
            .map_err(|_| TransferError::StreamCipher)?;

        Ok(Self { sender, cipher })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransferError> {
        let mut encrypted = buf.to_vec();
        crypto::apply_streamed_cipher(&mut self.cipher, &mut encrypted);
        self.sender.write_all(&encrypted).await
    }
}

/// Decrypts data with AES-256-CTR as it is read, consuming the 16-byte IV
/// prefix on construction.
pub struct StreamedEncryptedReceiver<'a, S> {
    receiver: StreamedReceiver<'a, S>,
    cipher: Aes256Ctr,
}

impl<'a, S: AsyncRead + Unpin> StreamedEncryptedReceiver<'a, S> {
    pub async fn new(
        inner: &'a mut S,
        aes_key: &[u8],
        timeout: Duration,
    ) -> Result<Self, TransferError> {
        let mut receiver = StreamedReceiver::new(inner, timeout);
        let mut iv = [0u8; STREAM_IV_SIZE];
        receiver.read_exact(&mut iv).await?;

        let cipher = crypto::new_streamed_cipher(aes_key, &iv)
            .map_err(|_| TransferError::StreamCipher)?;

        Ok(Self { receiver, cipher })
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransferError> {
        self.receiver.read_exact(buf).await?;
        crypto::apply_streamed_cipher(&mut self.cipher, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serialized_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let payload = b"hello named stream".to_vec();

        let sender = tokio::spawn(async move {
            send_serialized(&mut a, &payload, Duration::ZERO).await.unwrap();
        });
        let received = receive_serialized(&mut b, 1024, Duration::ZERO).await.unwrap();
        sender.await.unwrap();

        assert_eq!(received, b"hello named stream");
    }

    #[tokio::test]
    async fn serialized_rejects_oversized_payload() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let payload = vec![0u8; 64];

        tokio::spawn(async move {
            let _ = send_serialized(&mut a, &payload, Duration::ZERO).await;
        });
        let err = receive_serialized(&mut b, 8, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, TransferError::SmallBuffer));
    }

    #[tokio::test]
    async fn encrypted_round_trip() {
        let key = crypto::generate_aes_key(256);
        let (mut a, mut b) = tokio::io::duplex(256);
        let plaintext = b"secret payload".to_vec();

        let key_clone = key.clone();
        let plaintext_clone = plaintext.clone();
        let sender = tokio::spawn(async move {
            send_encrypted(&mut a, &plaintext_clone, Some(&key_clone), Duration::ZERO)
                .await
                .unwrap();
        });
        let received = receive_encrypted(&mut b, Some(&key), 1024, Duration::ZERO)
            .await
            .unwrap();
        sender.await.unwrap();

        assert_eq!(received, plaintext);
    }

    #[tokio::test]
    async fn streamed_encrypted_round_trip() {
        let key = crypto::generate_aes_key(256);
        let (mut a, mut b) = tokio::io::duplex(256);

        let key_clone = key.clone();
        let sender = tokio::spawn(async move {
            let mut writer = StreamedEncryptedSender::new(&mut a, &key_clone, Duration::ZERO)
                .await
                .unwrap();
            writer.write_all(b"chunk one ").await.unwrap();
            writer.write_all(b"chunk two ").await.unwrap();
        });

        let mut reader = StreamedEncryptedReceiver::new(&mut b, &key, Duration::ZERO)
            .await
            .unwrap();
        let mut chunk1 = [0u8; 10];
        let mut chunk2 = [0u8; 10];
        reader.read_exact(&mut chunk1).await.unwrap();
        reader.read_exact(&mut chunk2).await.unwrap();
        sender.await.unwrap();

        assert_eq!(&chunk1, b"chunk one ");
        assert_eq!(&chunk2, b"chunk two ");
    }

    #[tokio::test]
    async fn timeout_elapses_when_no_data_arrives() {
        let (_a, mut b) = tokio::io::duplex(256);
        let mut buf = [0u8; 4];
        let err = receive(&mut b, &mut buf, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout));
    }
}

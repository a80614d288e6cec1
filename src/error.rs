//! Error taxonomy for the whole crate.
//!
//! Each subsystem gets its own enum so callers can match on the variants that
//! matter to them; [`OnyNetError`] is the top-level union returned from the
//! public client/server API and wraps each subsystem error with `#[from]`.

use std::io;

use thiserror::Error;

/// Failures from the AEAD/CTR crypto primitives in [`crate::crypto`].
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key size")]
    Cipher,
    #[error("failed to create GCM cipher")]
    Gcm,
    #[error("ciphertext too short")]
    Short,
    #[error("ciphertext corrupted: {0}")]
    Decrypt(aes_gcm::Error),
}

/// Failures from the length-prefixed / streamed transfer primitives in
/// [`crate::transfer`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("write error: {0}")]
    Write(#[source] io::Error),
    #[error("read error: {0}")]
    Read(#[source] io::Error),
    #[error("short write")]
    ShortWrite,
    #[error("buffer too small")]
    SmallBuffer,
    #[error("invalid AES key")]
    AesKey,
    #[error("failed to create cipher stream")]
    StreamCipher,
    #[error("deadline elapsed")]
    Timeout,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Failures from the mutual-auth handshake in [`crate::auth`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("public key malformed or does not match private key")]
    PublicKey,
    #[error("private key malformed or does not match public key")]
    PrivateKey,
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Failures from the heartbeat liveness loop in [`crate::heartbeat`].
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("context cancelled")]
    CtxCancelled,
    #[error("unexpected message received: {0:?}")]
    UnexpectedMsg(Vec<u8>),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Failures from the named-stream multiplex manager in [`crate::multiplex`].
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("context cancelled")]
    CtxCancelled,
    #[error("failed to accept stream: {0}")]
    AcceptStream(#[source] io::Error),
    #[error("failed to open stream: {0}")]
    OpenStream(#[source] io::Error),
    #[error("failed to set deadline")]
    SetDeadline,
    #[error("name mismatch")]
    NameMismatch,
    #[error("timeout")]
    Timeout,
    #[error("name too long")]
    NameTooLong,
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Failures from the reliable-over-UDP transport in [`crate::transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid or unreachable address: {0}")]
    BadAddr(#[source] io::Error),
    #[error("accept failed on transport listener: {0}")]
    Accept(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The top-level error type returned from [`crate::Client`] and
/// [`crate::Server`].
#[derive(Debug, Error)]
pub enum OnyNetError {
    #[error("failed to dial: {0}")]
    Dial(#[source] TransportError),
    #[error("failed to create new server: {0}")]
    NewServer(#[source] TransportError),
    #[error("failed to accept client: {0}")]
    AcceptClient(#[source] TransportError),
    #[error("failed to authorize: {0}")]
    Auth(#[from] AuthError),
    #[error("failed to create session: {0}")]
    CreateSession(io::Error),
    #[error("failed to open heartbeat stream: {0}")]
    HeartbeatStream(#[source] StreamError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("context cancelled")]
    CtxCancelled,
    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

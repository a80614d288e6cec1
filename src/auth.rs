//! Mutual-auth handshake: RSA-OAEP key delivery plus an RSA-PKCS1v15
//! challenge/response used to prove server identity.
//!
//! The client always originates the challenge used to authenticate the
//! server: it is the client that has something to lose by talking to an
//! impostor server, so it is the client that picks the nonce it wants
//! signed.

use std::time::Duration;

use rand::rngs::OsRng;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::crypto;
use crate::error::AuthError;
use crate::transfer;

/// Default handshake deadline, used when callers don't override it via
/// configuration.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_CHALLENGE_LEN: usize = 32;
const RSA_CIPHERTEXT_MAX_LEN: usize = 4096;
const SIGNATURE_MAX_LEN: usize = 4096;

/// Client side: generates a fresh 256-bit AES key, seals it with the
/// server's RSA public key, and sends it length-prefixed.
pub async fn authorize_self_client<S: AsyncWrite + Unpin>(
    stream: &mut S,
    public_key: &RsaPublicKey,
    timeout: Duration,
) -> Result<Vec<u8>, AuthError> {
    let aes_key = crypto::generate_aes_key(256);
    log::debug!("authorize_self_client: generated aes key: {} bytes", aes_key.len());

    let ciphertext = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &aes_key)
        .map_err(|_| AuthError::PublicKey)?;

    transfer::send_serialized(stream, &ciphertext, timeout)
        .await
        .map_err(AuthError::Transfer)?;

    Ok(aes_key)
}

/// Client side: sends a random 32-byte challenge and verifies the server's
/// signature over its SHA-256 hash using the server's public key.
pub async fn authorize_server<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    public_key: &RsaPublicKey,
    timeout: Duration,
) -> Result<(), AuthError> {
    let mut challenge = [0u8; SERVER_CHALLENGE_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut challenge);
    let hash = Sha256::digest(challenge);

    transfer::send(stream, &challenge, timeout)
        .await
        .map_err(AuthError::Transfer)?;

    let signature = transfer::receive_serialized(stream, SIGNATURE_MAX_LEN, timeout)
        .await
        .map_err(AuthError::Transfer)?;

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hash, &signature)
        .map_err(|_| AuthError::PublicKey)
}

/// Server side: reads a client-originated challenge and returns it signed
/// with the server's private key.
pub async fn authorize_self_server<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    private_key: &RsaPrivateKey,
    timeout: Duration,
) -> Result<(), AuthError> {
    let mut challenge = [0u8; SERVER_CHALLENGE_LEN];
    transfer::receive(stream, &mut challenge, timeout)
        .await
        .map_err(AuthError::Transfer)?;

    let hash = Sha256::digest(challenge);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &hash)
        .map_err(|_| AuthError::PrivateKey)?;

    transfer::send_serialized(stream, &signature, timeout)
        .await
        .map_err(AuthError::Transfer)
}

/// Server side: reads the client's RSA-OAEP-sealed AES key and recovers it.
pub async fn authorize_client<S: AsyncRead + Unpin>(
    stream: &mut S,
    private_key: &RsaPrivateKey,
    timeout: Duration,
) -> Result<Vec<u8>, AuthError> {
    let ciphertext = transfer::receive_serialized(stream, RSA_CIPHERTEXT_MAX_LEN, timeout)
        .await
        .map_err(AuthError::Transfer)?;

    private_key
        .decrypt(Oaep::new::<Sha256>(), &ciphertext)
        .map_err(|_| AuthError::PrivateKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        (private_key, public_key)
    }

    #[tokio::test]
    async fn key_delivery_round_trips() {
        let (private_key, public_key) = test_keypair();
        let (mut client_side, mut server_side) = tokio::io::duplex(8192);

        let sender = tokio::spawn(async move {
            authorize_self_client(&mut client_side, &public_key, DEFAULT_HANDSHAKE_TIMEOUT)
                .await
                .unwrap()
        });
        let received = authorize_client(&mut server_side, &private_key, DEFAULT_HANDSHAKE_TIMEOUT)
            .await
            .unwrap();
        let sent = sender.await.unwrap();

        assert_eq!(sent, received);
    }

    #[tokio::test]
    async fn challenge_round_trips() {
        let (private_key, public_key) = test_keypair();
        let (mut client_side, mut server_side) = tokio::io::duplex(8192);

        let responder = tokio::spawn(async move {
            authorize_self_server(&mut server_side, &private_key, DEFAULT_HANDSHAKE_TIMEOUT)
                .await
                .unwrap();
        });
        authorize_server(&mut client_side, &public_key, DEFAULT_HANDSHAKE_TIMEOUT)
            .await
            .unwrap();
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn challenge_fails_with_wrong_public_key() {
        let (_private_key, _public_key) = test_keypair();
        let (other_private_key, _) = test_keypair();
        let (_, wrong_public_key) = test_keypair();
        let (mut client_side, mut server_side) = tokio::io::duplex(8192);

        let responder = tokio::spawn(async move {
            let _ = authorize_self_server(&mut server_side, &other_private_key, DEFAULT_HANDSHAKE_TIMEOUT).await;
        });
        let result = authorize_server(&mut client_side, &wrong_public_key, DEFAULT_HANDSHAKE_TIMEOUT).await;
        let _ = responder.await;

        assert!(result.is_err());
    }
}

//! AES-256-GCM sealing and AES-CTR keystream primitives.
//!
//! `Aes256Gcm` instances are expensive enough to build (key schedule) that we
//! cache one per distinct key, process-wide, the same way the reference
//! implementation memoizes its cipher.AEAD behind a key-keyed map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aes::cipher::{KeyIvInit, StreamCipher};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use once_cell::sync::Lazy;
use rand::RngCore;

use crate::error::CryptoError;

const AES_256_KEY_LEN: usize = 32;
const GCM_NONCE_LEN: usize = 12;

pub type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

static GCM_CACHE: Lazy<Mutex<HashMap<[u8; AES_256_KEY_LEN], Arc<Aes256Gcm>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn get_gcm(key: &[u8]) -> Result<Arc<Aes256Gcm>, CryptoError> {
    let key: [u8; AES_256_KEY_LEN] = key.try_into().map_err(|_| CryptoError::Cipher)?;

    let mut cache = GCM_CACHE.lock().expect("GCM cache lock poisoned");
    if let Some(gcm) = cache.get(&key) {
        return Ok(Arc::clone(gcm));
    }

    let gcm = Arc::new(Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Gcm)?);
    cache.insert(key, Arc::clone(&gcm));
    Ok(gcm)
}

/// Generates a random AES key of `bits` bits (must be a multiple of 8).
pub fn generate_aes_key(bits: usize) -> Vec<u8> {
    let mut key = vec![0u8; bits / 8];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypts `plaintext` with AES-256-GCM under `key`, returning
/// `nonce || ciphertext || tag`. The nonce is freshly random on every call.
pub fn encrypt_aes_gcm(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let gcm = get_gcm(key)?;

    let mut nonce_bytes = [0u8; GCM_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = gcm
        .encrypt(nonce, plaintext)
        .map_err(CryptoError::Decrypt)?;

    let mut out = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts data produced by [`encrypt_aes_gcm`].
pub fn decrypt_aes_gcm(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let gcm = get_gcm(key)?;

    if data.len() < GCM_NONCE_LEN {
        return Err(CryptoError::Short);
    }
    let (nonce_bytes, ciphertext) = data.split_at(GCM_NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    gcm.decrypt(nonce, ciphertext).map_err(CryptoError::Decrypt)
}

/// Builds an AES-256-CTR keystream cipher from a 32-byte key and 16-byte IV,
/// used by the streaming (non-AEAD) send/receive path.
pub fn new_streamed_cipher(key: &[u8], iv: &[u8]) -> Result<Aes256Ctr, CryptoError> {
    Aes256Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::Cipher)
}

/// Applies (or un-applies, CTR is symmetric) the keystream to `buf` in place.
pub fn apply_streamed_cipher(cipher: &mut Aes256Ctr, buf: &mut [u8]) {
    cipher.apply_keystream(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_gcm() {
        let key = generate_aes_key(256);
        let plaintext = b"named streams over kcp";
        let ciphertext = encrypt_aes_gcm(plaintext, &key).unwrap();
        assert_ne!(ciphertext[GCM_NONCE_LEN..], plaintext[..]);
        let decrypted = decrypt_aes_gcm(&ciphertext, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn rejects_short_ciphertext() {
        let key = generate_aes_key(256);
        let err = decrypt_aes_gcm(&[0u8; 4], &key).unwrap_err();
        assert!(matches!(err, CryptoError::Short));
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = generate_aes_key(256);
        let mut ciphertext = encrypt_aes_gcm(b"payload", &key).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt_aes_gcm(&ciphertext, &key).is_err());
    }

    #[test]
    fn nonces_are_not_reused() {
        let key = generate_aes_key(256);
        let a = encrypt_aes_gcm(b"same plaintext", &key).unwrap();
        let b = encrypt_aes_gcm(b"same plaintext", &key).unwrap();
        assert_ne!(a[..GCM_NONCE_LEN], b[..GCM_NONCE_LEN]);
    }

    #[test]
    fn streamed_cipher_round_trips() {
        let key = generate_aes_key(256);
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);

        let mut buf = b"streamed payload".to_vec();
        let mut enc = new_streamed_cipher(&key, &iv).unwrap();
        apply_streamed_cipher(&mut enc, &mut buf);
        assert_ne!(buf, b"streamed payload");

        let mut dec = new_streamed_cipher(&key, &iv).unwrap();
        apply_streamed_cipher(&mut dec, &mut buf);
        assert_eq!(buf, b"streamed payload");
    }
}

//! Symmetric traffic cipher.
//!
//! # Wire Format
//!
//! ```text
//! [12 bytes: random nonce] [ciphertext] [16 bytes: auth tag]
//! ```
//!
//! Keys are regenerated every session, so a random 96-bit nonce per message
//! is safe for the volume a session carries.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use interlock_common::helpers::constant_time_eq;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CipherError;

pub const SYMMETRIC_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    /// Generate a new random key using the thread CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw key bytes received from a peer.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; SYMMETRIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CipherError::InvalidKey(format!(
                "symmetric key must be {} bytes, got {}",
                SYMMETRIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes, for delivery inside a sealed handshake message.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new((&self.0).into());
        let ciphertext = cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::DecryptionFailed(format!(
                "ciphertext too short: {} bytes",
                data.len()
            )));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CipherError::DecryptionFailed(e.to_string()))
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = SymmetricKey::generate();
        let ciphertext = key.encrypt(b"score:120").unwrap();

        assert_eq!(ciphertext.len(), NONCE_LEN + 9 + TAG_LEN);
        assert_eq!(key.decrypt(&ciphertext).unwrap(), b"score:120");
    }

    #[test]
    fn test_nonce_differs_per_message() {
        let key = SymmetricKey::generate();
        assert_ne!(key.encrypt(b"same").unwrap(), key.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = SymmetricKey::generate().encrypt(b"secret").unwrap();
        assert!(SymmetricKey::generate().decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_tamper_detection() {
        let key = SymmetricKey::generate();
        let ciphertext = key.encrypt(b"sensitive data").unwrap();

        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            assert!(key.decrypt(&tampered).is_err(), "byte {} not covered", i);
        }
        assert!(key.decrypt(&ciphertext[..NONCE_LEN + TAG_LEN - 1]).is_err());
    }

    #[test]
    fn test_from_slice_length() {
        let key = SymmetricKey::generate();
        assert_eq!(SymmetricKey::from_slice(key.as_bytes()).unwrap(), key);
        assert!(SymmetricKey::from_slice(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        assert_eq!(
            format!("{:?}", SymmetricKey::generate()),
            "SymmetricKey(<redacted>)"
        );
    }
}

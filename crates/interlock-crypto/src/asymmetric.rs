//! Asymmetric keypair: sealed-box encryption and signatures.
//!
//! A keypair holds an X25519 agreement key for sealing messages to it and an
//! Ed25519 signing key for signing with it. Both halves travel together as one
//! 64-byte public key:
//!
//! ```text
//! [32 bytes: X25519 public key] [32 bytes: Ed25519 verifying key]
//! ```
//!
//! # Sealed box format
//!
//! ```text
//! [32 bytes: ephemeral X25519 public key] [ciphertext] [16 bytes: auth tag]
//! ```
//!
//! The box key is `SHA-256(label || shared || ephemeral_pub || recipient_pub)`.
//! Every box uses a fresh ephemeral key, so the ChaCha20-Poly1305 nonce is fixed.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::StaticSecret;

use crate::error::CipherError;

pub const PUBLIC_KEY_LEN: usize = 64;
pub const SIGNATURE_LEN: usize = 64;

const SEAL_LABEL: &[u8] = b"interlock-seal-v1";
const EPHEMERAL_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// This process's asymmetric keypair.
pub struct AsymmetricKeypair {
    agreement: StaticSecret,
    signing: SigningKey,
    public: PublicKey,
}

impl AsymmetricKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let agreement = StaticSecret::from(random_scalar());
        let signing = SigningKey::generate(&mut OsRng);
        let public = PublicKey {
            agreement: x25519_dalek::PublicKey::from(&agreement),
            verifying: signing.verifying_key(),
        };

        Self {
            agreement,
            signing,
            public,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Open a box sealed to this keypair's public key.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < EPHEMERAL_LEN + TAG_LEN {
            return Err(CipherError::DecryptionFailed(format!(
                "sealed box too short: {} bytes",
                sealed.len()
            )));
        }

        let (ephemeral_bytes, ciphertext) = sealed.split_at(EPHEMERAL_LEN);
        let mut ephemeral = [0u8; EPHEMERAL_LEN];
        ephemeral.copy_from_slice(ephemeral_bytes);
        let ephemeral = x25519_dalek::PublicKey::from(ephemeral);

        let shared = self.agreement.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(CipherError::InvalidKey("non-contributory ephemeral key".into()));
        }

        let cipher = box_cipher(shared.as_bytes(), &ephemeral, &self.public.agreement);
        cipher
            .decrypt(&Nonce::default(), ciphertext)
            .map_err(|e| CipherError::DecryptionFailed(e.to_string()))
    }

    /// Sign a message with this keypair.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }
}

/// A peer's public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    agreement: x25519_dalek::PublicKey,
    verifying: VerifyingKey,
}

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out[..32].copy_from_slice(self.agreement.as_bytes());
        out[32..].copy_from_slice(self.verifying.as_bytes());
        out
    }

    /// Parse a public key received from a peer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }

        let mut agreement = [0u8; 32];
        agreement.copy_from_slice(&bytes[..32]);
        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[32..]);

        let verifying = VerifyingKey::from_bytes(&verifying)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;

        Ok(Self {
            agreement: x25519_dalek::PublicKey::from(agreement),
            verifying,
        })
    }

    /// Seal `plaintext` so only the holder of this key can open it.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let ephemeral_secret = StaticSecret::from(random_scalar());
        let ephemeral = x25519_dalek::PublicKey::from(&ephemeral_secret);

        let shared = ephemeral_secret.diffie_hellman(&self.agreement);
        if !shared.was_contributory() {
            return Err(CipherError::InvalidKey("non-contributory recipient key".into()));
        }

        let cipher = box_cipher(shared.as_bytes(), &ephemeral, &self.agreement);
        let ciphertext = cipher
            .encrypt(&Nonce::default(), plaintext)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(EPHEMERAL_LEN + ciphertext.len());
        out.extend_from_slice(ephemeral.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Verify a signature made by the holder of this key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.verifying.verify(message, &sig).is_ok()
    }

    /// Short printable identifier (base64url of the first 12 bytes of SHA-256).
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.to_bytes());
        URL_SAFE_NO_PAD.encode(&hash[..12])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

fn random_scalar() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn box_cipher(
    shared: &[u8; 32],
    ephemeral: &x25519_dalek::PublicKey,
    recipient: &x25519_dalek::PublicKey,
) -> ChaCha20Poly1305 {
    let key: [u8; 32] = Sha256::new()
        .chain_update(SEAL_LABEL)
        .chain_update(shared)
        .chain_update(ephemeral.as_bytes())
        .chain_update(recipient.as_bytes())
        .finalize()
        .into();
    ChaCha20Poly1305::new((&key).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let keypair = AsymmetricKeypair::generate();
        let sealed = keypair.public_key().seal(b"password and nonce").unwrap();

        assert_eq!(sealed.len(), EPHEMERAL_LEN + 18 + TAG_LEN);
        assert_eq!(keypair.open(&sealed).unwrap(), b"password and nonce");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let alice = AsymmetricKeypair::generate();
        let mallory = AsymmetricKeypair::generate();
        let sealed = alice.public_key().seal(b"for alice").unwrap();

        assert!(mallory.open(&sealed).is_err());
    }

    #[test]
    fn test_open_rejects_tampering() {
        let keypair = AsymmetricKeypair::generate();
        let mut sealed = keypair.public_key().seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;

        assert!(keypair.open(&sealed).is_err());
        assert!(keypair.open(&sealed[..10]).is_err());
    }

    #[test]
    fn test_sign_verify() {
        let keypair = AsymmetricKeypair::generate();
        let signature = keypair.sign(b"digest");

        assert!(keypair.public_key().verify(b"digest", &signature));
        assert!(!keypair.public_key().verify(b"other", &signature));
        assert!(!keypair.public_key().verify(b"digest", &signature[..63]));

        let other = AsymmetricKeypair::generate();
        assert!(!other.public_key().verify(b"digest", &signature));
    }

    #[test]
    fn test_public_key_bytes_roundtrip() {
        let keypair = AsymmetricKeypair::generate();
        let bytes = keypair.public_key().to_bytes();
        let parsed = PublicKey::from_bytes(&bytes).unwrap();

        assert_eq!(&parsed, keypair.public_key());
        assert!(PublicKey::from_bytes(&bytes[..63]).is_err());
    }

    #[test]
    fn test_fingerprint() {
        let keypair = AsymmetricKeypair::generate();
        let fingerprint = keypair.public_key().fingerprint();

        // 12 bytes base64url without padding
        assert_eq!(fingerprint.len(), 16);
        assert_ne!(fingerprint, AsymmetricKeypair::generate().public_key().fingerprint());
    }
}

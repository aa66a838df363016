//! Error types shared by the cipher adapters and the strength functions.

use interlock_core::WireError;
use thiserror::Error;

/// Key or format mismatch while encrypting, decrypting or signing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

/// A protected Normal message failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtectionError {
    #[error("malformed protected message: {0}")]
    Wire(#[from] WireError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("message digest mismatch")]
    DigestMismatch,

    #[error("no symmetric key for strength {0}")]
    MissingSymmetricKey(interlock_core::ProtocolStrength),
}

/// The peer's handshake proof did not check out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed handshake message: {0}")]
    Wire(#[from] WireError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("shared secret mismatch")]
    PasswordMismatch,

    #[error("nonce mismatch")]
    NonceMismatch,

    #[error("interlock digest mismatch")]
    DigestMismatch,

    #[error("key delivery signature invalid")]
    BadSignature,

    #[error("handshake message received before peer credentials")]
    MissingPeerCredentials,
}

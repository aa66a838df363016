//! This process's per-session identity.

use std::fmt;

use interlock_common::SecurityConfig;
use interlock_core::{generate_nonce, Nonce, ProtocolStrength};
use zeroize::Zeroizing;

use crate::asymmetric::{AsymmetricKeypair, PublicKey};
use crate::symmetric::SymmetricKey;

/// Credentials every peer session reads from.
///
/// The nonce and symmetric key are replaced at each session boundary by
/// [`OwnCredentials::regenerate`]; the asymmetric keypair lives as long as
/// the process.
pub struct OwnCredentials {
    nonce: Nonce,
    keypair: AsymmetricKeypair,
    symmetric_key: SymmetricKey,
    strength: ProtocolStrength,
    shared_secret: Zeroizing<Vec<u8>>,
}

impl OwnCredentials {
    pub fn new(strength: ProtocolStrength, shared_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            nonce: generate_nonce(),
            keypair: AsymmetricKeypair::generate(),
            symmetric_key: SymmetricKey::generate(),
            strength,
            shared_secret: Zeroizing::new(shared_secret.into()),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.strength, config.shared_secret.as_bytes())
    }

    /// Start a new multiplayer session: fresh nonce and symmetric key.
    pub fn regenerate(&mut self) {
        self.nonce = generate_nonce();
        self.symmetric_key = SymmetricKey::generate();
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn keypair(&self) -> &AsymmetricKeypair {
        &self.keypair
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    pub fn symmetric_key(&self) -> &SymmetricKey {
        &self.symmetric_key
    }

    pub fn strength(&self) -> ProtocolStrength {
        self.strength
    }

    pub fn set_strength(&mut self, strength: ProtocolStrength) {
        self.strength = strength;
    }

    pub fn shared_secret(&self) -> &[u8] {
        &self.shared_secret
    }
}

impl fmt::Debug for OwnCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnCredentials")
            .field("public_key", self.public_key())
            .field("strength", &self.strength)
            .finish_non_exhaustive()
    }
}

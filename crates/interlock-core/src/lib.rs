//! Core Interlock wire types, framing, and constants.
//!
//! This crate provides:
//! - The envelope framing that tags every message as Ballot, Authentication, or Normal
//! - The five protocol strengths a peer may declare
//! - The composed-blob field codec, digests, and nonce generation used by the handshake

#![forbid(unsafe_code)]

pub mod envelope;
pub mod fields;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use envelope::{Category, Envelope, ParseStrengthError, ProtocolStrength};
pub use fields::{
    compose, decompose, decompose_exact, digest, generate_nonce, nonce_from_slice, split_halves,
    Digest, Nonce, DIGEST_LEN, NONCE_LEN,
};

/// Ballots are drawn uniformly from `[0, BALLOT_RANGE)`.
pub const BALLOT_RANGE: i32 = 10_000;

/// Wire format errors.
///
/// Envelope-level variants correspond to malformed envelopes; the rest are
/// decomposition failures of composed blobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("envelope too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),

    #[error("unknown category tag: {0}")]
    UnknownCategory(u8),

    #[error("unknown protocol strength token: {0}")]
    UnknownStrength(u8),

    #[error("ballot body must be 4 bytes, got {0}")]
    BallotLength(usize),

    #[error("invalid field count header: {0}")]
    InvalidFieldCount(i32),

    #[error("composed blob truncated: {0} bytes, declared {1}")]
    Truncated(usize, usize),

    #[error("composed blob has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("nonce must be 5 bytes, got {0}")]
    NonceLength(usize),
}

impl WireError {
    /// True for errors in the envelope framing itself rather than in a body.
    pub fn is_malformed_envelope(&self) -> bool {
        matches!(
            self,
            Self::TooShort(..)
                | Self::UnknownCategory(_)
                | Self::UnknownStrength(_)
                | Self::BallotLength(_)
        )
    }
}

/// Name of a participant as known to the relay transport.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PeerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_error_classification() {
        assert!(WireError::UnknownCategory(9).is_malformed_envelope());
        assert!(WireError::TooShort(0, 1).is_malformed_envelope());
        assert!(!WireError::Truncated(3, 12).is_malformed_envelope());
        assert!(!WireError::FieldCount { expected: 2, found: 3 }.is_malformed_envelope());
    }

    #[test]
    fn test_peer_id_display() {
        let peer = PeerId::from("player-2");
        assert_eq!(peer.to_string(), "player-2");
        assert_eq!(format!("{:?}", peer), "PeerId(player-2)");
        assert_eq!(peer, PeerId::new(String::from("player-2")));
    }
}

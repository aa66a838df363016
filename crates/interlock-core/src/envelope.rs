//! Envelope framing for everything exchanged between peers.
//!
//! # Packet Format
//!
//! ```text
//! Ballot:          [0x00] [4 bytes: signed ballot, big-endian]
//! Authentication:  [0x01] [1 byte: protocol strength] [body...]
//! Normal:          [0x02] [protected body...]
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::WireError;

/// Envelope category tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    /// Symmetry-breaking ballot.
    Ballot = 0,
    /// Interlock handshake message.
    Authentication = 1,
    /// Protected application traffic.
    Normal = 2,
}

impl TryFrom<u8> for Category {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ballot),
            1 => Ok(Self::Authentication),
            2 => Ok(Self::Normal),
            _ => Err(WireError::UnknownCategory(value)),
        }
    }
}

/// Security level a peer declares for itself.
///
/// Ordered by increasing guarantee. Each peer picks its own strength and its
/// correspondents respect it; nothing is negotiated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProtocolStrength {
    /// No credential exchange, traffic passes unmodified.
    None = 0,
    /// Password proof; traffic carries a keyed digest.
    T2 = 1,
    /// Password proof plus symmetric key delivery; traffic is encrypted.
    T3 = 2,
    /// As T3, with digest-then-payload interlock.
    T4 = 3,
    /// Signed symmetric key delivery.
    #[default]
    T5 = 4,
}

impl ProtocolStrength {
    pub const ALL: [ProtocolStrength; 5] = [Self::None, Self::T2, Self::T3, Self::T4, Self::T5];

    /// Token used on the wire.
    pub fn token(self) -> u8 {
        self as u8
    }

    /// Whether peers of this strength prove knowledge of the shared secret.
    pub fn requires_shared_secret(self) -> bool {
        matches!(self, Self::T2 | Self::T3 | Self::T4)
    }

    /// Whether traffic to peers of this strength is symmetric-encrypted.
    pub fn encrypts_traffic(self) -> bool {
        matches!(self, Self::T3 | Self::T4 | Self::T5)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::T2 => "t2",
            Self::T3 => "t3",
            Self::T4 => "t4",
            Self::T5 => "t5",
        }
    }
}

impl TryFrom<u8> for ProtocolStrength {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::T2),
            2 => Ok(Self::T3),
            3 => Ok(Self::T4),
            4 => Ok(Self::T5),
            _ => Err(WireError::UnknownStrength(value)),
        }
    }
}

impl fmt::Display for ProtocolStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown protocol strength {0:?}, expected one of none, t2, t3, t4, t5")]
pub struct ParseStrengthError(String);

impl FromStr for ProtocolStrength {
    type Err = ParseStrengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "t2" => Ok(Self::T2),
            "t3" => Ok(Self::T3),
            "t4" => Ok(Self::T4),
            "t5" => Ok(Self::T5),
            _ => Err(ParseStrengthError(s.to_string())),
        }
    }
}

/// A decoded message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Ballot(i32),
    Authentication {
        /// Strength the sender declares for itself.
        strength: ProtocolStrength,
        body: Vec<u8>,
    },
    Normal(Vec<u8>),
}

impl Envelope {
    pub fn category(&self) -> Category {
        match self {
            Self::Ballot(_) => Category::Ballot,
            Self::Authentication { .. } => Category::Authentication,
            Self::Normal(_) => Category::Normal,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ballot(value) => {
                let mut buf = Vec::with_capacity(5);
                buf.put_u8(Category::Ballot as u8);
                buf.put_i32(*value);
                buf
            }
            Self::Authentication { strength, body } => {
                let mut buf = Vec::with_capacity(2 + body.len());
                buf.put_u8(Category::Authentication as u8);
                buf.put_u8(strength.token());
                buf.put_slice(body);
                buf
            }
            Self::Normal(body) => {
                let mut buf = Vec::with_capacity(1 + body.len());
                buf.put_u8(Category::Normal as u8);
                buf.put_slice(body);
                buf
            }
        }
    }

    /// Decode from wire bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut cursor = buf;
        if !cursor.has_remaining() {
            return Err(WireError::TooShort(0, 1));
        }

        match Category::try_from(cursor.get_u8())? {
            Category::Ballot => {
                if cursor.remaining() != 4 {
                    return Err(WireError::BallotLength(cursor.remaining()));
                }
                Ok(Self::Ballot(cursor.get_i32()))
            }
            Category::Authentication => {
                if !cursor.has_remaining() {
                    return Err(WireError::TooShort(buf.len(), 2));
                }
                let strength = ProtocolStrength::try_from(cursor.get_u8())?;
                Ok(Self::Authentication {
                    strength,
                    body: cursor.to_vec(),
                })
            }
            Category::Normal => Ok(Self::Normal(cursor.to_vec())),
        }
    }
}

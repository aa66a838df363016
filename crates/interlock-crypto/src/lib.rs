//! Handshake and protected messaging for Interlock peers.
//!
//! This crate provides:
//! - Sealed-box, signature and symmetric cipher adapters
//! - The per-strength interlock, conclusion and traffic protection functions
//! - A per-peer ballot and handshake state machine
//! - A router that multiplexes every peer session over one relay transport
//!
//! # Design
//!
//! No message is trusted to the relay. Each peer proves knowledge of the shared
//! secret and its nonce in two halves (the interlock), so a relay that forwards
//! the first half cannot learn enough to impersonate either side. At strength
//! T5 the password is ignored and the peer instead proves possession of its
//! private key by signing the delivered symmetric key.

#![forbid(unsafe_code)]

pub mod asymmetric;
pub mod credentials;
pub mod error;
pub mod router;
pub mod session;
pub mod strength;
pub mod symmetric;

pub use asymmetric::{AsymmetricKeypair, PublicKey};
pub use credentials::OwnCredentials;
pub use error::{AuthError, CipherError, ProtectionError};
pub use router::{PlaintextSink, Recipient, SecureRouter, Transport};
pub use session::{Channel, HandshakeState, Outgoing, PeerSession, SessionError};
pub use strength::ProtectionKeys;
pub use symmetric::SymmetricKey;

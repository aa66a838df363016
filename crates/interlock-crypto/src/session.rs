//! Per-peer ballot, handshake and traffic state machine.
//!
//! # Ballot
//!
//! A new session immediately sends a random ballot. The side holding the lower
//! ballot waits; the side that receives a higher ballot than its own speaks
//! first. Equal ballots are redrawn.
//!
//! # Handshake Flow
//!
//! Each side sends exactly one Authentication message after processing each
//! one it receives; the initiator alone sends message 0 unprompted.
//!
//! ```text
//! Initiator                               Responder
//!     |  #0 nonce, public key                  |
//!     |--------------------------------------->|
//!     |                  #0 nonce, public key  |
//!     |<---------------------------------------|
//!     |  #1 interlock[0]                       |
//!     |--------------------------------------->|
//!     |                       #1 interlock[0]  |
//!     |<---------------------------------------|
//!     |  #2 interlock[1]                       |
//!     |--------------------------------------->|
//!     |                       #2 interlock[1]  |
//!     |<---------------------------------------|
//!     |  #3 closing                            |
//!     |--------------------------------------->|
//!     |                            #3 closing  |
//!     |<---------------------------------------|
//! ```
//!
//! The peer is authenticated as soon as its proof is complete: after #0 for
//! NONE, #1 for T5, #2 for T2/T3/T4. Messages sent before that are queued and
//! flushed, in order, right after.

use std::collections::VecDeque;

use interlock_core::{
    compose, decompose_exact, nonce_from_slice, Envelope, Nonce, PeerId, ProtocolStrength,
    BALLOT_RANGE,
};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::asymmetric::PublicKey;
use crate::credentials::OwnCredentials;
use crate::error::{AuthError, ProtectionError};
use crate::strength::{self, conclusion_index, ProtectionKeys};
use crate::symmetric::SymmetricKey;

/// Authentication messages each side sends.
pub const HANDSHAKE_MESSAGES: usize = 4;

/// Transport delivery class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// At-least-once delivery.
    Reliable,
    /// Best effort.
    Unreliable,
}

/// Bytes a session wants handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

impl Outgoing {
    fn reliable(envelope: Envelope) -> Self {
        Self {
            channel: Channel::Reliable,
            bytes: envelope.encode(),
        }
    }
}

/// Coarse session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the peer's ballot.
    Balloting,
    /// Ballot decided, interlock exchange in progress.
    Handshaking,
    /// Peer proof verified; traffic flows.
    Authenticated,
    /// Authentication failed or was aborted. Terminal.
    Failed,
}

/// Errors surfaced by a peer session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication with {peer} failed: {source}")]
    Authentication {
        peer: PeerId,
        #[source]
        source: AuthError,
    },

    #[error("session with {0} has failed")]
    Failed(PeerId),

    #[error("protecting message for {peer} failed: {source}")]
    Protection {
        peer: PeerId,
        #[source]
        source: ProtectionError,
    },
}

/// What the peer declared in its message 0.
struct PeerCredentials {
    nonce: Nonce,
    public_key: PublicKey,
    strength: ProtocolStrength,
}

/// Keys for protecting traffic to an authenticated peer.
struct PeerTraffic {
    strength: ProtocolStrength,
    nonce: Nonce,
    symmetric_key: Option<SymmetricKey>,
}

impl PeerTraffic {
    fn protect(
        &self,
        credentials: &OwnCredentials,
        message: &[u8],
    ) -> Result<Vec<u8>, ProtectionError> {
        let keys = ProtectionKeys {
            secret: credentials.shared_secret(),
            nonce: &self.nonce,
            symmetric_key: self.symmetric_key.as_ref(),
        };
        let protected = strength::protect(self.strength, message, &keys)?;
        Ok(Envelope::Normal(protected).encode())
    }
}

/// State machine for one remote participant.
pub struct PeerSession {
    peer_id: PeerId,
    own_ballot: i32,
    decided: bool,
    initiator: bool,
    /// Strength announced in our message 0; fixed for the rest of the handshake.
    declared_strength: Option<ProtocolStrength>,
    peer: Option<PeerCredentials>,
    interlock_out: Option<[Vec<u8>; 2]>,
    interlock_in: [Vec<u8>; 2],
    sent_count: usize,
    received_count: usize,
    traffic: Option<PeerTraffic>,
    failed: bool,
    reliable_queue: VecDeque<Vec<u8>>,
    unreliable_queue: VecDeque<Vec<u8>>,
    messages_protected: u64,
    messages_dropped: u64,
}

impl PeerSession {
    /// Create a session and emit its opening ballot.
    pub fn new(peer_id: PeerId, out: &mut Vec<Outgoing>) -> Self {
        Self::with_ballot(peer_id, draw_ballot(), out)
    }

    /// Create a session with a chosen opening ballot.
    pub fn with_ballot(peer_id: PeerId, ballot: i32, out: &mut Vec<Outgoing>) -> Self {
        debug!(peer = %peer_id, ballot, "opening peer session");
        out.push(Outgoing::reliable(Envelope::Ballot(ballot)));

        Self {
            peer_id,
            own_ballot: ballot,
            decided: false,
            initiator: false,
            declared_strength: None,
            peer: None,
            interlock_out: None,
            interlock_in: [Vec::new(), Vec::new()],
            sent_count: 0,
            received_count: 0,
            traffic: None,
            failed: false,
            reliable_queue: VecDeque::new(),
            unreliable_queue: VecDeque::new(),
            messages_protected: 0,
            messages_dropped: 0,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn own_ballot(&self) -> i32 {
        self.own_ballot
    }

    /// `Some(true)` once this side has won the ballot and speaks first.
    pub fn is_initiator(&self) -> Option<bool> {
        self.decided.then_some(self.initiator)
    }

    pub fn is_authenticated(&self) -> bool {
        self.traffic.is_some()
    }

    pub fn state(&self) -> HandshakeState {
        if self.failed {
            HandshakeState::Failed
        } else if self.traffic.is_some() {
            HandshakeState::Authenticated
        } else if self.decided {
            HandshakeState::Handshaking
        } else {
            HandshakeState::Balloting
        }
    }

    /// Strength this side announced in its message 0, fixed for the session.
    pub fn declared_strength(&self) -> Option<ProtocolStrength> {
        self.declared_strength
    }

    /// Strength the peer declared, once its message 0 has arrived.
    pub fn peer_strength(&self) -> Option<ProtocolStrength> {
        self.peer.as_ref().map(|p| p.strength)
    }

    pub fn peer_public_key(&self) -> Option<&PublicKey> {
        self.peer.as_ref().map(|p| &p.public_key)
    }

    /// Handshake messages (sent, received) so far.
    pub fn handshake_progress(&self) -> (usize, usize) {
        (self.sent_count, self.received_count)
    }

    /// Messages waiting for authentication (reliable, unreliable).
    pub fn queued(&self) -> (usize, usize) {
        (self.reliable_queue.len(), self.unreliable_queue.len())
    }

    pub fn messages_protected(&self) -> u64 {
        self.messages_protected
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
    }

    /// Process the peer's ballot.
    pub fn handle_ballot(
        &mut self,
        value: i32,
        credentials: &OwnCredentials,
        out: &mut Vec<Outgoing>,
    ) {
        if self.failed || self.decided {
            debug!(peer = %self.peer_id, value, "ignoring ballot");
            return;
        }

        if value == self.own_ballot {
            self.own_ballot = draw_ballot();
            debug!(
                peer = %self.peer_id,
                collided = value,
                ballot = self.own_ballot,
                "ballot collision, redrawing"
            );
            out.push(Outgoing::reliable(Envelope::Ballot(self.own_ballot)));
            return;
        }

        self.decided = true;
        self.initiator = value > self.own_ballot;
        debug!(
            peer = %self.peer_id,
            own = self.own_ballot,
            theirs = value,
            initiator = self.initiator,
            "ballot decided"
        );

        if self.initiator {
            self.send_credentials(credentials, out);
        }
    }

    /// Process one Authentication message from the peer.
    ///
    /// A failed proof marks the session failed, drops its queues, and is
    /// returned exactly once; later messages are ignored.
    pub fn handle_authentication(
        &mut self,
        strength: ProtocolStrength,
        body: &[u8],
        credentials: &OwnCredentials,
        out: &mut Vec<Outgoing>,
    ) -> Result<(), SessionError> {
        if self.failed {
            debug!(peer = %self.peer_id, "ignoring handshake message for failed session");
            return Ok(());
        }
        if self.received_count >= HANDSHAKE_MESSAGES {
            debug!(peer = %self.peer_id, "ignoring handshake message after closing");
            return Ok(());
        }
        if !self.decided {
            // Only the ballot winner sends unprompted.
            debug!(peer = %self.peer_id, "handshake started before our ballot was answered");
            self.decided = true;
            self.initiator = false;
        }

        match self.advance_handshake(strength, body, credentials, out) {
            Ok(()) => Ok(()),
            Err(source) => {
                let dropped = self.fail();
                warn!(peer = %self.peer_id, error = %source, dropped, "peer authentication failed");
                Err(SessionError::Authentication {
                    peer: self.peer_id.clone(),
                    source,
                })
            }
        }
    }

    fn advance_handshake(
        &mut self,
        strength: ProtocolStrength,
        body: &[u8],
        credentials: &OwnCredentials,
        out: &mut Vec<Outgoing>,
    ) -> Result<(), AuthError> {
        let index = self.received_count;
        self.received_count += 1;

        match index {
            0 => self.accept_peer_credentials(strength, body, credentials)?,
            1 | 2 => self.interlock_in[index - 1] = body.to_vec(),
            _ => {}
        }

        let concluding = self.traffic.is_none()
            && self
                .peer
                .as_ref()
                .is_some_and(|peer| conclusion_index(peer.strength) == index);
        if concluding {
            self.conclude(credentials)?;
        }

        if self.sent_count < HANDSHAKE_MESSAGES {
            self.send_next_authentication(credentials, out)?;
        }

        if concluding {
            self.flush(credentials, out);
        }
        Ok(())
    }

    fn accept_peer_credentials(
        &mut self,
        strength: ProtocolStrength,
        body: &[u8],
        credentials: &OwnCredentials,
    ) -> Result<(), AuthError> {
        let fields = decompose_exact(body, 2)?;
        let nonce = nonce_from_slice(&fields[0])?;
        let public_key = PublicKey::from_bytes(&fields[1])?;

        let declared = *self
            .declared_strength
            .get_or_insert_with(|| credentials.strength());
        self.interlock_out = Some(strength::interlock_messages(
            declared,
            credentials,
            &nonce,
            &public_key,
        )?);

        debug!(
            peer = %self.peer_id,
            peer_strength = %strength,
            fingerprint = %public_key.fingerprint(),
            "received peer credentials"
        );
        self.peer = Some(PeerCredentials {
            nonce,
            public_key,
            strength,
        });
        Ok(())
    }

    fn conclude(&mut self, credentials: &OwnCredentials) -> Result<(), AuthError> {
        let peer = self.peer.as_ref().ok_or(AuthError::MissingPeerCredentials)?;
        let symmetric_key =
            strength::conclude(peer.strength, credentials, &peer.public_key, &self.interlock_in)?;

        info!(
            peer = %self.peer_id,
            peer_strength = %peer.strength,
            fingerprint = %peer.public_key.fingerprint(),
            "peer authenticated"
        );
        self.traffic = Some(PeerTraffic {
            strength: peer.strength,
            nonce: peer.nonce,
            symmetric_key,
        });
        self.interlock_in = [Vec::new(), Vec::new()];
        Ok(())
    }

    fn send_next_authentication(
        &mut self,
        credentials: &OwnCredentials,
        out: &mut Vec<Outgoing>,
    ) -> Result<(), AuthError> {
        let body = match self.sent_count {
            0 => {
                self.send_credentials(credentials, out);
                return Ok(());
            }
            index @ (1 | 2) => {
                let interlock = self
                    .interlock_out
                    .as_ref()
                    .ok_or(AuthError::MissingPeerCredentials)?;
                interlock[index - 1].clone()
            }
            _ => Vec::new(),
        };
        self.push_authentication(credentials, body, out);
        Ok(())
    }

    /// Message 0: our nonce and public key.
    fn send_credentials(&mut self, credentials: &OwnCredentials, out: &mut Vec<Outgoing>) {
        let body = compose(&[
            credentials.nonce().as_slice(),
            credentials.public_key().to_bytes().as_slice(),
        ]);
        self.push_authentication(credentials, body, out);
    }

    fn push_authentication(
        &mut self,
        credentials: &OwnCredentials,
        body: Vec<u8>,
        out: &mut Vec<Outgoing>,
    ) {
        let declared = *self
            .declared_strength
            .get_or_insert_with(|| credentials.strength());
        self.sent_count += 1;
        out.push(Outgoing::reliable(Envelope::Authentication {
            strength: declared,
            body,
        }));
    }

    /// Send an application message, or queue it until authentication.
    pub fn send(
        &mut self,
        channel: Channel,
        message: &[u8],
        credentials: &OwnCredentials,
        out: &mut Vec<Outgoing>,
    ) -> Result<(), SessionError> {
        if self.failed {
            return Err(SessionError::Failed(self.peer_id.clone()));
        }

        let Some(traffic) = self.traffic.as_ref() else {
            match channel {
                Channel::Reliable => self.reliable_queue.push_back(message.to_vec()),
                Channel::Unreliable => self.unreliable_queue.push_back(message.to_vec()),
            }
            debug!(peer = %self.peer_id, ?channel, "queued message until authenticated");
            return Ok(());
        };

        let bytes = traffic
            .protect(credentials, message)
            .map_err(|source| SessionError::Protection {
                peer: self.peer_id.clone(),
                source,
            })?;
        self.messages_protected += 1;
        out.push(Outgoing { channel, bytes });
        Ok(())
    }

    fn flush(&mut self, credentials: &OwnCredentials, out: &mut Vec<Outgoing>) {
        let Some(traffic) = self.traffic.as_ref() else {
            return;
        };

        let reliable = std::mem::take(&mut self.reliable_queue);
        let unreliable = std::mem::take(&mut self.unreliable_queue);
        let queued = reliable
            .into_iter()
            .map(|m| (Channel::Reliable, m))
            .chain(unreliable.into_iter().map(|m| (Channel::Unreliable, m)));

        for (channel, message) in queued {
            match traffic.protect(credentials, &message) {
                Ok(bytes) => {
                    self.messages_protected += 1;
                    out.push(Outgoing { channel, bytes });
                }
                Err(e) => {
                    self.messages_dropped += 1;
                    warn!(peer = %self.peer_id, error = %e, "dropping queued message");
                }
            }
        }
    }

    /// Mark the session permanently failed and drop its queued messages.
    ///
    /// Returns how many queued messages were dropped.
    pub fn fail(&mut self) -> usize {
        let dropped = self.reliable_queue.len() + self.unreliable_queue.len();
        self.failed = true;
        self.reliable_queue.clear();
        self.unreliable_queue.clear();
        self.interlock_out = None;
        self.interlock_in = [Vec::new(), Vec::new()];
        self.messages_dropped += dropped as u64;
        dropped
    }
}

fn draw_ballot() -> i32 {
    rand::thread_rng().gen_range(0..BALLOT_RANGE)
}

//! Demultiplexing between the relay transport, peer sessions and the application.
//!
//! Inbound bytes are dispatched by envelope category. Ballot and
//! Authentication messages drive the sender's [`PeerSession`], created on
//! first contact. Normal messages are verified with this process's own
//! credentials and the strength its session with the sender announced, since
//! the sender protected them for us, and the plaintext is handed to the
//! [`PlaintextSink`]. Anything that fails to decode or verify is dropped.
//!
//! # Locking
//!
//! Credentials sit behind a read-write lock, the session map behind a mutex,
//! and the outbox behind another mutex, always acquired in that order.
//! Outgoing bytes are staged in the outbox before the session lock is
//! released and handed to the transport afterwards by a single draining
//! caller at a time, so the transport sees them in the order sessions
//! produced them. Transport and application callbacks run with no lock held,
//! so either may call back into the router.

use std::collections::{HashMap, HashSet, VecDeque};

use interlock_core::{Envelope, PeerId, ProtocolStrength};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::credentials::OwnCredentials;
use crate::session::{Channel, HandshakeState, Outgoing, PeerSession, SessionError};
use crate::strength::{self, ProtectionKeys};

/// Outbound side of the relay transport.
pub trait Transport: Send + Sync {
    fn send_reliable(&self, bytes: &[u8], peer: &PeerId);
    fn send_unreliable(&self, bytes: &[u8], peer: &PeerId);
}

/// Receiver of verified plaintext.
pub trait PlaintextSink: Send + Sync {
    fn on_plaintext(&self, peer: &PeerId, bytes: &[u8]);
}

/// Addressee of an application send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Peer(PeerId),
    /// Every known peer not excluded and not failed.
    Broadcast,
}

/// Bytes waiting for the transport, in production order.
#[derive(Default)]
struct Outbox {
    pending: VecDeque<(PeerId, Outgoing)>,
    draining: bool,
}

/// Owns every peer session of this process.
pub struct SecureRouter<T, S> {
    credentials: RwLock<OwnCredentials>,
    sessions: Mutex<HashMap<PeerId, PeerSession>>,
    outbox: Mutex<Outbox>,
    transport: T,
    sink: S,
}

impl<T: Transport, S: PlaintextSink> SecureRouter<T, S> {
    pub fn new(credentials: OwnCredentials, transport: T, sink: S) -> Self {
        info!(
            fingerprint = %credentials.public_key().fingerprint(),
            strength = %credentials.strength(),
            "secure router ready"
        );
        Self {
            credentials: RwLock::new(credentials),
            sessions: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Outbox::default()),
            transport,
            sink,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handle bytes the transport received from `peer`.
    ///
    /// Returns an error only when this message made `peer`'s handshake fail;
    /// that happens at most once per session.
    pub fn on_message(&self, peer: &PeerId, bytes: &[u8]) -> Result<(), SessionError> {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(peer = %peer, error = %e, "dropping malformed envelope");
                return Ok(());
            }
        };

        let mut out = Vec::new();
        let mut delivered = None;
        let result = {
            let credentials = self.credentials.read();
            let mut sessions = self.sessions.lock();
            let session = sessions
                .entry(peer.clone())
                .or_insert_with(|| PeerSession::new(peer.clone(), &mut out));

            let result = match envelope {
                Envelope::Ballot(value) => {
                    session.handle_ballot(value, &credentials, &mut out);
                    Ok(())
                }
                Envelope::Authentication { strength, body } => {
                    session.handle_authentication(strength, &body, &credentials, &mut out)
                }
                Envelope::Normal(body) => {
                    if session.state() == HandshakeState::Failed {
                        debug!(peer = %peer, "dropping message from failed session");
                    } else {
                        let strength = session
                            .declared_strength()
                            .unwrap_or_else(|| credentials.strength());
                        delivered = verify_inbound(&credentials, strength, peer, &body);
                    }
                    Ok(())
                }
            };
            self.stage(peer, out);
            result
        };

        self.drain();
        if let Some(plaintext) = delivered {
            self.sink.on_plaintext(peer, &plaintext);
        }
        result
    }

    /// Send reliably to one peer or broadcast, skipping `excluded`.
    pub fn send_reliable(
        &self,
        bytes: &[u8],
        recipient: Recipient,
        excluded: &HashSet<PeerId>,
    ) -> Result<(), SessionError> {
        self.send(Channel::Reliable, bytes, recipient, excluded)
    }

    /// Send best-effort to one peer or broadcast, skipping `excluded`.
    pub fn send_unreliable(
        &self,
        bytes: &[u8],
        recipient: Recipient,
        excluded: &HashSet<PeerId>,
    ) -> Result<(), SessionError> {
        self.send(Channel::Unreliable, bytes, recipient, excluded)
    }

    fn send(
        &self,
        channel: Channel,
        bytes: &[u8],
        recipient: Recipient,
        excluded: &HashSet<PeerId>,
    ) -> Result<(), SessionError> {
        let result = {
            let credentials = self.credentials.read();
            let mut sessions = self.sessions.lock();

            match recipient {
                Recipient::Peer(peer) if excluded.contains(&peer) => Ok(()),
                Recipient::Peer(peer) => {
                    let mut out = Vec::new();
                    let session = sessions
                        .entry(peer.clone())
                        .or_insert_with(|| PeerSession::new(peer.clone(), &mut out));
                    let result = session.send(channel, bytes, &credentials, &mut out);
                    self.stage(&peer, out);
                    result
                }
                Recipient::Broadcast => {
                    let mut first_error = None;
                    for (peer, session) in sessions.iter_mut() {
                        if excluded.contains(peer) || session.state() == HandshakeState::Failed {
                            continue;
                        }
                        let mut out = Vec::new();
                        if let Err(e) = session.send(channel, bytes, &credentials, &mut out) {
                            warn!(peer = %peer, error = %e, "broadcast send failed");
                            first_error.get_or_insert(e);
                        }
                        self.stage(peer, out);
                    }
                    first_error.map_or(Ok(()), Err)
                }
            }
        };

        self.drain();
        result
    }

    /// Open a session with `peer` without sending anything yet.
    pub fn connect(&self, peer: &PeerId) {
        {
            let mut sessions = self.sessions.lock();
            let mut out = Vec::new();
            sessions
                .entry(peer.clone())
                .or_insert_with(|| PeerSession::new(peer.clone(), &mut out));
            self.stage(peer, out);
        }
        self.drain();
    }

    /// Give up on `peer`'s handshake, dropping its queued messages.
    ///
    /// Returns false if no session exists for `peer`.
    pub fn abort(&self, peer: &PeerId) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(peer) {
            Some(session) => {
                let dropped = session.fail();
                warn!(peer = %peer, dropped, "peer session aborted");
                true
            }
            None => false,
        }
    }

    pub fn status(&self, peer: &PeerId) -> Option<HandshakeState> {
        self.sessions.lock().get(peer).map(PeerSession::state)
    }

    /// Peers with a session, in no particular order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Inspect one session.
    pub fn with_session<R>(&self, peer: &PeerId, f: impl FnOnce(&PeerSession) -> R) -> Option<R> {
        self.sessions.lock().get(peer).map(f)
    }

    pub fn strength(&self) -> ProtocolStrength {
        self.credentials.read().strength()
    }

    /// Change the strength declared in future handshakes.
    ///
    /// Sessions that already sent message 0 keep the strength they announced,
    /// for both directions of traffic.
    pub fn set_strength(&self, strength: ProtocolStrength) {
        self.credentials.write().set_strength(strength);
        info!(%strength, "own protocol strength changed");
    }

    pub fn fingerprint(&self) -> String {
        self.credentials.read().public_key().fingerprint()
    }

    /// Tear down every peer session and regenerate credentials for the next
    /// multiplayer session.
    pub fn end_session(&self) {
        let mut credentials = self.credentials.write();
        let mut sessions = self.sessions.lock();
        let count = sessions.len();
        sessions.clear();
        credentials.regenerate();
        info!(peers = count, "multiplayer session ended");
    }

    /// Queue a session's output. Called with the session lock held.
    fn stage(&self, peer: &PeerId, out: Vec<Outgoing>) {
        if out.is_empty() {
            return;
        }
        self.outbox
            .lock()
            .pending
            .extend(out.into_iter().map(|o| (peer.clone(), o)));
    }

    /// Hand staged bytes to the transport unless another caller already is.
    fn drain(&self) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let next = {
                let mut outbox = self.outbox.lock();
                let next = outbox.pending.pop_front();
                if next.is_none() {
                    outbox.draining = false;
                }
                next
            };
            let Some((peer, Outgoing { channel, bytes })) = next else {
                return;
            };
            match channel {
                Channel::Reliable => self.transport.send_reliable(&bytes, &peer),
                Channel::Unreliable => self.transport.send_unreliable(&bytes, &peer),
            }
        }
    }
}

fn verify_inbound(
    credentials: &OwnCredentials,
    strength: ProtocolStrength,
    peer: &PeerId,
    body: &[u8],
) -> Option<Vec<u8>> {
    let keys = ProtectionKeys::own(credentials);
    match strength::verify(strength, body, &keys) {
        Ok(plaintext) => Some(plaintext),
        Err(e) => {
            debug!(peer = %peer, error = %e, "dropping unverifiable message");
            None
        }
    }
}

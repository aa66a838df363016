//! Per-strength handshake and message-protection rules.
//!
//! Everything here is a pure function of explicit key material. Two rules
//! decide which strength applies where:
//!
//! - A process builds its interlock messages according to its *own* strength,
//!   and verifies a peer's interlock messages according to the *peer's*.
//! - Traffic to a peer is protected according to the *peer's* strength, and
//!   inbound traffic is verified according to the receiver's *own* strength.
//!
//! | Strength | interlock #1 | interlock #2 | traffic |
//! |---|---|---|---|
//! | NONE | empty | empty | plain |
//! | T2 | half of `seal(secret, nonce)` | other half | digest(secret, nonce, m) + m |
//! | T3 | half of `seal(secret, nonce, key)` | other half | digest(secret, nonce, m) + enc(m) |
//! | T4 | `digest(seal(secret, nonce, key))` | the sealed box | digest(secret, nonce, m) + enc(m) |
//! | T5 | `seal(key, nonce)` + signature of its digest | empty | digest(nonce, m) + enc(m) |

use interlock_common::helpers::constant_time_eq;
use interlock_core::{
    compose, decompose_exact, digest, nonce_from_slice, split_halves, Digest, Nonce,
    ProtocolStrength,
};

use crate::asymmetric::PublicKey;
use crate::credentials::OwnCredentials;
use crate::error::{AuthError, CipherError, ProtectionError};
use crate::symmetric::SymmetricKey;

/// Key material that protects or verifies Normal traffic.
///
/// When protecting, these are the recipient's nonce and symmetric key; when
/// verifying, the receiver's own.
#[derive(Debug, Clone, Copy)]
pub struct ProtectionKeys<'a> {
    pub secret: &'a [u8],
    pub nonce: &'a Nonce,
    pub symmetric_key: Option<&'a SymmetricKey>,
}

impl<'a> ProtectionKeys<'a> {
    /// Keys for verifying traffic addressed to this process.
    pub fn own(credentials: &'a OwnCredentials) -> Self {
        Self {
            secret: credentials.shared_secret(),
            nonce: credentials.nonce(),
            symmetric_key: Some(credentials.symmetric_key()),
        }
    }
}

/// Build the two interlock messages this process sends to a peer.
///
/// `strength` is the strength this process declared in its message 0.
pub fn interlock_messages(
    strength: ProtocolStrength,
    own: &OwnCredentials,
    peer_nonce: &Nonce,
    peer_key: &PublicKey,
) -> Result<[Vec<u8>; 2], CipherError> {
    let secret = own.shared_secret();
    let own_key = own.symmetric_key().as_bytes().as_slice();

    match strength {
        ProtocolStrength::None => Ok([Vec::new(), Vec::new()]),
        ProtocolStrength::T2 => {
            let sealed = peer_key.seal(&compose(&[secret, peer_nonce.as_slice()]))?;
            let (first, second) = split_halves(&sealed);
            Ok([first, second])
        }
        ProtocolStrength::T3 => {
            let sealed = peer_key.seal(&compose(&[secret, peer_nonce.as_slice(), own_key]))?;
            let (first, second) = split_halves(&sealed);
            Ok([first, second])
        }
        ProtocolStrength::T4 => {
            let sealed = peer_key.seal(&compose(&[secret, peer_nonce.as_slice(), own_key]))?;
            Ok([digest(&[&sealed]).to_vec(), sealed])
        }
        ProtocolStrength::T5 => {
            let sealed = peer_key.seal(&compose(&[own_key, peer_nonce.as_slice()]))?;
            let signature = own.keypair().sign(&digest(&[&sealed]));
            Ok([compose(&[sealed.as_slice(), signature.as_slice()]), Vec::new()])
        }
    }
}

/// Index of the peer's handshake message after which its proof is complete.
///
/// Message 0 carries nonce and public key; 1 and 2 carry the interlock pair.
pub fn conclusion_index(peer_strength: ProtocolStrength) -> usize {
    match peer_strength {
        ProtocolStrength::None => 0,
        ProtocolStrength::T5 => 1,
        ProtocolStrength::T2 | ProtocolStrength::T3 | ProtocolStrength::T4 => 2,
    }
}

/// Verify the interlock pair a peer sent, per the peer's declared strength.
///
/// Returns the symmetric key the peer delivered, if its strength delivers one.
pub fn conclude(
    peer_strength: ProtocolStrength,
    own: &OwnCredentials,
    peer_key: &PublicKey,
    interlock_in: &[Vec<u8>; 2],
) -> Result<Option<SymmetricKey>, AuthError> {
    match peer_strength {
        ProtocolStrength::None => Ok(None),
        ProtocolStrength::T2 => {
            let sealed = [interlock_in[0].as_slice(), interlock_in[1].as_slice()].concat();
            let fields = open_fields(own, &sealed, 2)?;
            check_secret(own, &fields[0])?;
            check_nonce(own, &fields[1])?;
            Ok(None)
        }
        ProtocolStrength::T3 => {
            let sealed = [interlock_in[0].as_slice(), interlock_in[1].as_slice()].concat();
            password_key_proof(own, &sealed).map(Some)
        }
        ProtocolStrength::T4 => {
            if !constant_time_eq(&digest(&[&interlock_in[1]]), &interlock_in[0]) {
                return Err(AuthError::DigestMismatch);
            }
            password_key_proof(own, &interlock_in[1]).map(Some)
        }
        ProtocolStrength::T5 => {
            let parts = decompose_exact(&interlock_in[0], 2)?;
            let (sealed, signature) = (&parts[0], &parts[1]);
            if !peer_key.verify(&digest(&[sealed]), signature) {
                return Err(AuthError::BadSignature);
            }
            let fields = open_fields(own, sealed, 2)?;
            check_nonce(own, &fields[1])?;
            Ok(Some(SymmetricKey::from_slice(&fields[0])?))
        }
    }
}

fn password_key_proof(own: &OwnCredentials, sealed: &[u8]) -> Result<SymmetricKey, AuthError> {
    let fields = open_fields(own, sealed, 3)?;
    check_secret(own, &fields[0])?;
    check_nonce(own, &fields[1])?;
    Ok(SymmetricKey::from_slice(&fields[2])?)
}

fn open_fields(
    own: &OwnCredentials,
    sealed: &[u8],
    expected: usize,
) -> Result<Vec<Vec<u8>>, AuthError> {
    let plaintext = own.keypair().open(sealed)?;
    Ok(decompose_exact(&plaintext, expected)?)
}

fn check_secret(own: &OwnCredentials, received: &[u8]) -> Result<(), AuthError> {
    if constant_time_eq(received, own.shared_secret()) {
        Ok(())
    } else {
        Err(AuthError::PasswordMismatch)
    }
}

fn check_nonce(own: &OwnCredentials, received: &[u8]) -> Result<(), AuthError> {
    let nonce = nonce_from_slice(received)?;
    if constant_time_eq(&nonce, own.nonce()) {
        Ok(())
    } else {
        Err(AuthError::NonceMismatch)
    }
}

/// Protect an outbound message for a recipient of the given strength.
pub fn protect(
    strength: ProtocolStrength,
    message: &[u8],
    keys: &ProtectionKeys<'_>,
) -> Result<Vec<u8>, ProtectionError> {
    if strength == ProtocolStrength::None {
        return Ok(message.to_vec());
    }

    let tag = traffic_digest(strength, keys, message);
    if strength.encrypts_traffic() {
        let key = keys
            .symmetric_key
            .ok_or(ProtectionError::MissingSymmetricKey(strength))?;
        let ciphertext = key.encrypt(message)?;
        Ok(compose(&[tag.as_slice(), ciphertext.as_slice()]))
    } else {
        Ok(compose(&[tag.as_slice(), message]))
    }
}

/// Verify an inbound message protected for this process's strength.
pub fn verify(
    strength: ProtocolStrength,
    protected: &[u8],
    keys: &ProtectionKeys<'_>,
) -> Result<Vec<u8>, ProtectionError> {
    if strength == ProtocolStrength::None {
        return Ok(protected.to_vec());
    }

    let parts = decompose_exact(protected, 2)?;
    let (tag, body) = (&parts[0], &parts[1]);
    let message = if strength.encrypts_traffic() {
        let key = keys
            .symmetric_key
            .ok_or(ProtectionError::MissingSymmetricKey(strength))?;
        key.decrypt(body)?
    } else {
        body.clone()
    };

    if !constant_time_eq(&traffic_digest(strength, keys, &message), tag) {
        return Err(ProtectionError::DigestMismatch);
    }
    Ok(message)
}

// T5 traffic digests omit the shared secret.
fn traffic_digest(
    strength: ProtocolStrength,
    keys: &ProtectionKeys<'_>,
    message: &[u8],
) -> Digest {
    match strength {
        ProtocolStrength::T5 => digest(&[keys.nonce.as_slice(), message]),
        _ => digest(&[keys.secret, keys.nonce.as_slice(), message]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interlock_core::generate_nonce;
    use proptest::prelude::*;

    fn pair(a: ProtocolStrength, b: ProtocolStrength) -> (OwnCredentials, OwnCredentials) {
        (
            OwnCredentials::new(a, "shared password"),
            OwnCredentials::new(b, "shared password"),
        )
    }

    /// `sender` proves itself to `receiver`; returns the receiver's verdict.
    fn prove(
        sender: &OwnCredentials,
        receiver: &OwnCredentials,
    ) -> Result<Option<SymmetricKey>, AuthError> {
        let interlock = interlock_for(sender, receiver);
        conclude(sender.strength(), receiver, sender.public_key(), &interlock)
    }

    fn interlock_for(sender: &OwnCredentials, receiver: &OwnCredentials) -> [Vec<u8>; 2] {
        interlock_messages(
            sender.strength(),
            sender,
            receiver.nonce(),
            receiver.public_key(),
        )
        .unwrap()
    }

    #[test]
    fn test_every_strength_concludes() {
        for strength in ProtocolStrength::ALL {
            let (sender, receiver) = pair(strength, ProtocolStrength::None);
            let delivered = prove(&sender, &receiver).unwrap();

            if strength.encrypts_traffic() {
                assert_eq!(delivered.as_ref(), Some(sender.symmetric_key()), "{}", strength);
            } else {
                assert!(delivered.is_none(), "{}", strength);
            }
        }
    }

    #[test]
    fn test_wrong_password_rejected() {
        for strength in [ProtocolStrength::T2, ProtocolStrength::T3, ProtocolStrength::T4] {
            let sender = OwnCredentials::new(strength, "guess");
            let receiver = OwnCredentials::new(ProtocolStrength::T2, "shared password");
            assert_eq!(
                prove(&sender, &receiver).unwrap_err(),
                AuthError::PasswordMismatch,
                "{}",
                strength
            );
        }
    }

    #[test]
    fn test_stale_nonce_rejected() {
        for strength in [
            ProtocolStrength::T2,
            ProtocolStrength::T3,
            ProtocolStrength::T4,
            ProtocolStrength::T5,
        ] {
            let (sender, mut receiver) = pair(strength, ProtocolStrength::T5);
            let interlock = interlock_for(&sender, &receiver);
            receiver.regenerate();

            assert_eq!(
                conclude(strength, &receiver, sender.public_key(), &interlock).unwrap_err(),
                AuthError::NonceMismatch,
                "{}",
                strength
            );
        }
    }

    #[test]
    fn test_interlock_shapes() {
        let (_, receiver) = pair(ProtocolStrength::None, ProtocolStrength::None);
        for strength in ProtocolStrength::ALL {
            let sender = OwnCredentials::new(strength, "shared password");
            let [first, second] = interlock_for(&sender, &receiver);
            match strength {
                ProtocolStrength::None => assert!(first.is_empty() && second.is_empty()),
                ProtocolStrength::T2 | ProtocolStrength::T3 => {
                    assert!(second.len() - first.len() <= 1)
                }
                ProtocolStrength::T4 => assert_eq!(first, digest(&[&second]).to_vec()),
                ProtocolStrength::T5 => assert!(second.is_empty()),
            }
        }
    }

    #[test]
    fn test_half_substitution_detected() {
        // A man in the middle swapping in half of his own box cannot pass.
        for strength in [ProtocolStrength::T2, ProtocolStrength::T3] {
            let (sender, receiver) = pair(strength, ProtocolStrength::None);
            let mallory = OwnCredentials::new(strength, "shared password");

            let genuine = interlock_for(&sender, &receiver);
            let forged = interlock_for(&mallory, &receiver);
            let spliced = [genuine[0].clone(), forged[1].clone()];

            assert!(conclude(strength, &receiver, sender.public_key(), &spliced).is_err());
        }
    }

    #[test]
    fn test_t4_digest_checked_first() {
        let (sender, receiver) = pair(ProtocolStrength::T4, ProtocolStrength::None);
        let mut interlock = interlock_for(&sender, &receiver);
        interlock[0][0] ^= 0xff;

        assert_eq!(
            conclude(ProtocolStrength::T4, &receiver, sender.public_key(), &interlock).unwrap_err(),
            AuthError::DigestMismatch
        );
    }

    #[test]
    fn test_t5_wrong_signer_rejected() {
        let (sender, receiver) = pair(ProtocolStrength::T5, ProtocolStrength::None);
        let impostor = OwnCredentials::new(ProtocolStrength::T5, "");
        let interlock = interlock_for(&sender, &receiver);

        assert_eq!(
            conclude(ProtocolStrength::T5, &receiver, impostor.public_key(), &interlock)
                .unwrap_err(),
            AuthError::BadSignature
        );
    }

    #[test]
    fn test_t5_ignores_password() {
        let sender = OwnCredentials::new(ProtocolStrength::T5, "one");
        let receiver = OwnCredentials::new(ProtocolStrength::T5, "two");
        assert!(prove(&sender, &receiver).unwrap().is_some());
    }

    #[test]
    fn test_sealed_for_someone_else_rejected() {
        let (sender, receiver) = pair(ProtocolStrength::T3, ProtocolStrength::None);
        let bystander = OwnCredentials::new(ProtocolStrength::None, "shared password");
        let interlock = interlock_for(&sender, &bystander);

        assert!(matches!(
            conclude(ProtocolStrength::T3, &receiver, sender.public_key(), &interlock),
            Err(AuthError::Cipher(_))
        ));
    }

    #[test]
    fn test_conclusion_index() {
        assert_eq!(conclusion_index(ProtocolStrength::None), 0);
        assert_eq!(conclusion_index(ProtocolStrength::T2), 2);
        assert_eq!(conclusion_index(ProtocolStrength::T3), 2);
        assert_eq!(conclusion_index(ProtocolStrength::T4), 2);
        assert_eq!(conclusion_index(ProtocolStrength::T5), 1);
    }

    #[test]
    fn test_every_corrupted_byte_fails_verification() {
        let key = SymmetricKey::generate();
        let nonce = generate_nonce();
        let keys = ProtectionKeys {
            secret: b"pw",
            nonce: &nonce,
            symmetric_key: Some(&key),
        };

        for strength in &ProtocolStrength::ALL[1..] {
            let protected = protect(*strength, b"score:120", &keys).unwrap();
            for i in 0..protected.len() {
                let mut corrupted = protected.clone();
                corrupted[i] ^= 0x01;
                assert!(
                    verify(*strength, &corrupted, &keys).is_err(),
                    "{}: byte {} not covered",
                    strength,
                    i
                );
            }
        }
    }

    #[test]
    fn test_none_passes_through() {
        let nonce = generate_nonce();
        let keys = ProtectionKeys {
            secret: b"",
            nonce: &nonce,
            symmetric_key: None,
        };
        assert_eq!(protect(ProtocolStrength::None, b"raw", &keys).unwrap(), b"raw");
        assert_eq!(verify(ProtocolStrength::None, b"raw", &keys).unwrap(), b"raw");
    }

    #[test]
    fn test_t2_is_not_encrypted() {
        let nonce = generate_nonce();
        let keys = ProtectionKeys {
            secret: b"pw",
            nonce: &nonce,
            symmetric_key: None,
        };
        let protected = protect(ProtocolStrength::T2, b"visible", &keys).unwrap();
        assert!(protected.ends_with(b"visible"));
    }

    #[test]
    fn test_missing_symmetric_key() {
        let nonce = generate_nonce();
        let keys = ProtectionKeys {
            secret: b"pw",
            nonce: &nonce,
            symmetric_key: None,
        };
        assert_eq!(
            protect(ProtocolStrength::T3, b"m", &keys).unwrap_err(),
            ProtectionError::MissingSymmetricKey(ProtocolStrength::T3)
        );
    }

    #[test]
    fn test_wrong_nonce_or_secret_fails() {
        let key = SymmetricKey::generate();
        let nonce = generate_nonce();
        let keys = ProtectionKeys {
            secret: b"pw",
            nonce: &nonce,
            symmetric_key: Some(&key),
        };
        let mut other_nonce = nonce;
        other_nonce[0] ^= 0xff;

        for strength in &ProtocolStrength::ALL[1..] {
            let protected = protect(*strength, b"m", &keys).unwrap();
            let stale = ProtectionKeys {
                nonce: &other_nonce,
                ..keys
            };
            assert_eq!(
                verify(*strength, &protected, &stale).unwrap_err(),
                ProtectionError::DigestMismatch
            );
        }

        // T5 traffic is keyed by nonce and symmetric key only.
        let protected = protect(ProtocolStrength::T5, b"m", &keys).unwrap();
        let other_secret = ProtectionKeys {
            secret: b"different",
            ..keys
        };
        assert!(verify(ProtocolStrength::T5, &protected, &other_secret).is_ok());
        let protected = protect(ProtocolStrength::T4, b"m", &keys).unwrap();
        assert!(verify(ProtocolStrength::T4, &protected, &other_secret).is_err());
    }

    proptest! {
        #[test]
        fn prop_protect_verify_roundtrip(
            token in 0u8..5,
            message in prop::collection::vec(any::<u8>(), 0..256),
            secret in prop::collection::vec(any::<u8>(), 0..32),
        ) {
            let strength = ProtocolStrength::try_from(token).unwrap();
            let key = SymmetricKey::generate();
            let nonce = generate_nonce();
            let keys = ProtectionKeys { secret: &secret, nonce: &nonce, symmetric_key: Some(&key) };

            let protected = protect(strength, &message, &keys).unwrap();
            prop_assert_eq!(verify(strength, &protected, &keys).unwrap(), message);
        }
    }
}

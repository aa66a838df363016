//! Composed field blobs, digests, and nonces.
//!
//! A composed blob packs an ordered list of byte fields into one
//! self-describing buffer:
//!
//! ```text
//! [4 bytes: -(field_count)] [field_count x 4 bytes: field length] [field bytes...]
//! ```
//!
//! All integers are big-endian. The count is stored negated so the leading
//! byte always has its high bit set.

use bytes::{Buf, BufMut};
use rand::RngCore;
use sha2::{Digest as _, Sha256};

use crate::WireError;

/// Length of every nonce in the system.
pub const NONCE_LEN: usize = 5;

/// Length of a message digest.
pub const DIGEST_LEN: usize = 32;

pub type Nonce = [u8; NONCE_LEN];
pub type Digest = [u8; DIGEST_LEN];

const COUNT_HEADER_LEN: usize = 4;
const LENGTH_ENTRY_LEN: usize = 4;

/// Pack `fields` into a single composed blob.
pub fn compose<F: AsRef<[u8]>>(fields: &[F]) -> Vec<u8> {
    let payload_len: usize = fields.iter().map(|f| f.as_ref().len()).sum();
    let mut buf =
        Vec::with_capacity(COUNT_HEADER_LEN + fields.len() * LENGTH_ENTRY_LEN + payload_len);

    buf.put_i32(-(fields.len() as i32));
    for field in fields {
        buf.put_u32(field.as_ref().len() as u32);
    }
    for field in fields {
        buf.put_slice(field.as_ref());
    }
    buf
}

/// Unpack a composed blob into its fields.
///
/// Rejects blobs shorter or longer than the length their header declares.
pub fn decompose(blob: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    if blob.len() < COUNT_HEADER_LEN {
        return Err(WireError::Truncated(blob.len(), COUNT_HEADER_LEN));
    }

    let mut cursor = blob;
    let header = cursor.get_i32();
    if header >= 0 {
        return Err(WireError::InvalidFieldCount(header));
    }
    let count = header.unsigned_abs() as usize;

    let lengths_end = count
        .checked_mul(LENGTH_ENTRY_LEN)
        .and_then(|n| n.checked_add(COUNT_HEADER_LEN))
        .ok_or(WireError::InvalidFieldCount(header))?;
    if blob.len() < lengths_end {
        return Err(WireError::Truncated(blob.len(), lengths_end));
    }

    let mut lengths = Vec::with_capacity(count);
    let mut total = lengths_end;
    for _ in 0..count {
        let len = cursor.get_u32() as usize;
        total = total
            .checked_add(len)
            .ok_or(WireError::Truncated(blob.len(), usize::MAX))?;
        lengths.push(len);
    }

    if blob.len() < total {
        return Err(WireError::Truncated(blob.len(), total));
    }
    if blob.len() > total {
        return Err(WireError::TrailingBytes(blob.len() - total));
    }

    let mut fields = Vec::with_capacity(count);
    for len in lengths {
        fields.push(cursor[..len].to_vec());
        cursor.advance(len);
    }
    Ok(fields)
}

/// Unpack a composed blob that must contain exactly `expected` fields.
pub fn decompose_exact(blob: &[u8], expected: usize) -> Result<Vec<Vec<u8>>, WireError> {
    let fields = decompose(blob)?;
    if fields.len() != expected {
        return Err(WireError::FieldCount {
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

/// Digest an ordered list of parts.
///
/// Each part is length-prefixed before hashing so that moving bytes across a
/// part boundary changes the digest.
pub fn digest<P: AsRef<[u8]>>(parts: &[P]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Draw a fresh random nonce.
pub fn generate_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Interpret a received field as a nonce.
pub fn nonce_from_slice(bytes: &[u8]) -> Result<Nonce, WireError> {
    bytes
        .try_into()
        .map_err(|_| WireError::NonceLength(bytes.len()))
}

/// Split a blob into two halves; the second half takes the odd byte.
pub fn split_halves(blob: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let (first, second) = blob.split_at(blob.len() / 2);
    (first.to_vec(), second.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compose_layout() {
        let blob = compose(&[b"ab".as_slice(), b"cde".as_slice()]);

        assert_eq!(&blob[0..4], &(-2i32).to_be_bytes());
        assert_eq!(&blob[4..8], &2u32.to_be_bytes());
        assert_eq!(&blob[8..12], &3u32.to_be_bytes());
        assert_eq!(&blob[12..], b"abcde");
        // Negated count keeps the high bit of the first byte set.
        assert!(blob[0] & 0x80 != 0);
    }

    #[test]
    fn test_empty_fields_survive() {
        let fields: Vec<Vec<u8>> = vec![vec![], b"x".to_vec(), vec![]];
        assert_eq!(decompose(&compose(&fields)).unwrap(), fields);
    }

    #[test]
    fn test_decompose_rejects_truncation() {
        let blob = compose(&[b"hello".as_slice(), b"world".as_slice()]);
        for cut in 0..blob.len() {
            assert!(decompose(&blob[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_decompose_rejects_trailing_bytes() {
        let mut blob = compose(&[b"hello".as_slice()]);
        blob.push(0);
        assert_eq!(decompose(&blob), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn test_decompose_rejects_non_negative_header() {
        assert_eq!(
            decompose(&[0, 0, 0, 1, 0, 0, 0, 0]),
            Err(WireError::InvalidFieldCount(1))
        );
        assert_eq!(decompose(&[0, 0, 0, 0]), Err(WireError::InvalidFieldCount(0)));
    }

    #[test]
    fn test_decompose_huge_declared_count() {
        let blob = i32::MIN.to_be_bytes();
        assert!(matches!(decompose(&blob), Err(WireError::Truncated(4, _))));
    }

    #[test]
    fn test_decompose_exact_field_count() {
        let blob = compose(&[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
        assert_eq!(
            decompose_exact(&blob, 2),
            Err(WireError::FieldCount {
                expected: 2,
                found: 3
            })
        );
        assert_eq!(decompose_exact(&blob, 3).unwrap().len(), 3);
    }

    #[test]
    fn test_digest_is_boundary_sensitive() {
        assert_ne!(
            digest(&[b"ab".as_slice(), b"c".as_slice()]),
            digest(&[b"a".as_slice(), b"bc".as_slice()])
        );
        assert_eq!(digest(&[b"abc"]), digest(&[b"abc".to_vec()]));
    }

    #[test]
    fn test_split_halves() {
        let (a, b) = split_halves(b"12345");
        assert_eq!(a, b"12");
        assert_eq!(b, b"345");

        let (a, b) = split_halves(b"");
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_nonce_from_slice() {
        let nonce = generate_nonce();
        assert_eq!(nonce_from_slice(&nonce).unwrap(), nonce);
        assert_eq!(nonce_from_slice(&[1, 2, 3]), Err(WireError::NonceLength(3)));
    }

    proptest! {
        #[test]
        fn prop_compose_roundtrip(fields in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8)) {
            prop_assert_eq!(decompose(&compose(&fields)).unwrap(), fields);
        }

        #[test]
        fn prop_split_halves_concat(blob in prop::collection::vec(any::<u8>(), 0..256)) {
            let (a, b) = split_halves(&blob);
            prop_assert_eq!([a, b].concat(), blob);
        }
    }
}

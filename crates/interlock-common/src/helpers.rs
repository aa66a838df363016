//! Byte comparison for credentials received from peers.

/// Compare two byte strings without an early exit on the first difference.
///
/// Lengths are not secret; only contents are compared in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

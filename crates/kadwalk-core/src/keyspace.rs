//! XOR key space
//!
//! Every key and peer identity is hashed with BLAKE3 into a 256-bit point.
//! Closeness between two points is their bitwise XOR read as a big-endian
//! unsigned integer.

use std::fmt;

/// Width of the key space in bytes
pub const KEY_BYTES: usize = 32;

/// Width of the key space in bits
pub const KEY_BITS: usize = KEY_BYTES * 8;

/// A coordinate in the key space
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point([u8; KEY_BYTES]);

/// XOR distance between two points
///
/// Derived `Ord` compares the bytes lexicographically, which is the numeric
/// order of the big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Distance([u8; KEY_BYTES]);

/// Map an arbitrary identifier into the key space
pub fn to_point(data: &[u8]) -> Point {
    Point(*blake3::hash(data).as_bytes())
}

impl Point {
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    pub fn distance(&self, other: &Point) -> Distance {
        let mut result = [0u8; KEY_BYTES];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(result)
    }
}

impl Distance {
    pub const ZERO: Distance = Distance([0u8; KEY_BYTES]);
    pub const MAX: Distance = Distance([0xff; KEY_BYTES]);

    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Build a distance whose low 64 bits are `value`
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        bytes[KEY_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Number of leading zero bits, i.e. the length of the prefix the two
    /// points share. A zero distance has a common prefix of `KEY_BITS`.
    pub fn common_prefix_len(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        KEY_BITS
    }

    /// Lossy real-valued view, for scorers that rank on a continuous scale.
    pub fn to_f64(&self) -> f64 {
        self.0
            .iter()
            .fold(0.0f64, |acc, byte| acc * 256.0 + f64::from(*byte))
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_symmetric() {
        let a = to_point(b"alpha");
        let b = to_point(b"beta");

        assert_eq!(a.distance(&b), b.distance(&a));
        assert!(!a.distance(&b).is_zero());
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = to_point(b"alpha");
        assert_eq!(a.distance(&a), Distance::ZERO);
        assert_eq!(a.distance(&a).common_prefix_len(), KEY_BITS);
    }

    #[test]
    fn test_to_point_deterministic() {
        assert_eq!(to_point(b"same"), to_point(b"same"));
        assert_ne!(to_point(b"same"), to_point(b"other"));
    }

    #[test]
    fn test_distance_ordering_is_numeric() {
        let mut high = [0u8; KEY_BYTES];
        high[0] = 1;
        let low = Distance::from_u64(u64::MAX);

        assert!(low < Distance::from_bytes(high));
        assert!(Distance::from_u64(3) < Distance::from_u64(5));
    }

    #[test]
    fn test_common_prefix_len() {
        let mut dist = [0u8; KEY_BYTES];
        dist[31] = 1;
        assert_eq!(Distance::from_bytes(dist).common_prefix_len(), 255);

        dist[31] = 0x80;
        assert_eq!(Distance::from_bytes(dist).common_prefix_len(), 248);

        dist[0] = 0x80;
        assert_eq!(Distance::from_bytes(dist).common_prefix_len(), 0);
    }

    #[test]
    fn test_to_f64_preserves_order() {
        assert_eq!(Distance::from_u64(5).to_f64(), 5.0);
        assert!(Distance::from_u64(3).to_f64() < Distance::from_u64(9).to_f64());
        assert!(Distance::MAX.to_f64() > Distance::from_u64(u64::MAX).to_f64());
    }
}

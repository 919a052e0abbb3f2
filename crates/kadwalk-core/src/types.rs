//! Core data types for kadwalk

use crate::keyspace::{to_point, Point, KEY_BYTES};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// A lookup target
///
/// Keys are never empty. The point is computed once on construction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    bytes: Arc<[u8]>,
    point: Point,
}

impl Key {
    /// Create a key from raw bytes, hashing them into the key space
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        if bytes.is_empty() {
            return Err(Error::EmptyKey);
        }
        Ok(Self {
            bytes: Arc::from(bytes),
            point: to_point(bytes),
        })
    }

    /// Use an existing key-space point directly as the target
    #[cfg(any(test, feature = "testing"))]
    pub fn from_point(point: Point) -> Self {
        Self {
            bytes: Arc::from(&point.as_bytes()[..]),
            point,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn point(&self) -> &Point {
        &self.point
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", short_hex(&self.bytes))
    }
}

/// Opaque identity of a network participant
///
/// Cloning is cheap. Two ids are equal when both their bytes and their
/// key-space point match.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    bytes: Arc<[u8]>,
    point: Point,
}

impl PeerId {
    /// Create a peer id from opaque bytes, hashing them into the key space
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        if bytes.is_empty() {
            return Err(Error::InvalidPeerId("empty id".to_string()));
        }
        Ok(Self {
            bytes: Arc::from(bytes),
            point: to_point(bytes),
        })
    }

    /// A peer placed at an exact key-space point
    ///
    /// The id bytes are the point itself, so [`PeerId::from_hex`] does not
    /// reproduce it. Only for placing peers at chosen distances in tests.
    #[cfg(any(test, feature = "testing"))]
    pub fn from_point(point: Point) -> Self {
        Self {
            bytes: Arc::from(&point.as_bytes()[..]),
            point,
        }
    }

    /// Generate a random peer id
    pub fn random() -> Result<Self> {
        let mut bytes = [0u8; KEY_BYTES];
        getrandom::getrandom(&mut bytes).map_err(|e| Error::InvalidPeerId(e.to_string()))?;
        Self::new(bytes)
    }

    /// Parse a hex-encoded peer id
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidPeerId(e.to_string()))?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn point(&self) -> &Point {
        &self.point
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", short_hex(&self.bytes))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", short_hex(&self.bytes))
    }
}

/// A peer returned by a query, with enough information to contact it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Transport addresses, opaque to the lookup
    pub addrs: Vec<String>,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        Self { id, addrs: Vec::new() }
    }

    pub fn with_addrs(id: PeerId, addrs: Vec<String>) -> Self {
        Self { id, addrs }
    }
}

fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

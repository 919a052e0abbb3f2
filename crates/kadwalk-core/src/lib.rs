//! kadwalk core - Shared types, key space, and query transport
//!
//! This crate provides the building blocks the lookup engine in
//! `kadwalk-dht` is written against: keys and peer identities, the XOR key
//! space they are mapped into, the transport trait used to ask a peer for
//! closer peers, and the cancellation token a lookup observes.

pub mod cancel;
pub mod error;
pub mod keyspace;
pub mod transport;
pub mod types;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use keyspace::{to_point, Distance, Point, KEY_BITS, KEY_BYTES};
pub use transport::PeerQuery;
pub use types::*;

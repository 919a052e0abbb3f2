//! kadwalk DHT - iterative Kademlia closest-peer lookup
//!
//! This crate finds the peers closest to a key under the XOR metric by
//! repeatedly asking the best known peers for closer ones.
//!
//! - [`peerset`]: per-lookup peer state machine with lazy sorted views
//! - [`scorer`]: optional latency-aware re-ranking of candidates
//! - [`routing`]: the routing-table collaborator and a k-bucket table
//! - [`lookup`]: the bounded-concurrency lookup engine

pub mod config;
pub mod lookup;
pub mod peerset;
pub mod routing;
pub mod scorer;

pub use config::LookupConfig;
pub use lookup::{LookupContext, LookupEngine, LookupResult, LookupStats, QueryEvent};
pub use peerset::{PeerSetError, PeerState, QueryPeerSet};
pub use routing::{PeerRouting, RoutingTable};
pub use scorer::{LatencyScorer, PeerScorer, Ranking, ScorerStats};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("can't lookup empty key")]
    EmptyKey,

    #[error("lookup cancelled")]
    Cancelled { partial: LookupResult },

    #[error("lookup deadline exceeded")]
    DeadlineExceeded { partial: LookupResult },

    #[error("invalid lookup config: {0}")]
    InvalidConfig(String),

    #[error("lookup invariant violated: {0}")]
    Invariant(#[from] PeerSetError),
}

impl LookupError {
    /// Best result found before the lookup was interrupted
    pub fn partial(&self) -> Option<&LookupResult> {
        match self {
            LookupError::Cancelled { partial } | LookupError::DeadlineExceeded { partial } => {
                Some(partial)
            }
            _ => None,
        }
    }

    /// Whether the caller interrupted the lookup, as opposed to bad input or a bug
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            LookupError::Cancelled { .. } | LookupError::DeadlineExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LookupError>;

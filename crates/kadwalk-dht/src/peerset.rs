//! Per-lookup peer state
//!
//! A [`QueryPeerSet`] tracks every peer heard of during one lookup, its
//! distance to the target, where it is in its query lifecycle and which peer
//! referred us to it. It is owned by a single lookup coordinator and dropped
//! when the lookup ends.

use crate::scorer::{Ranking, ScorerStats};
use kadwalk_core::{Distance, Key, PeerId};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// Lifecycle of a peer within one lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Discovered, not queried yet
    Heard,
    /// Query in flight
    Waiting,
    /// Query answered
    Queried,
    /// Query failed or timed out
    Unreachable,
}

/// Operating on a peer the set has never seen
///
/// This is a bug in the caller, never a network condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerSetError {
    #[error("peer {0} is not in the query peer set")]
    UnknownPeer(PeerId),
}

#[derive(Debug, Clone)]
pub struct QueryPeerRecord {
    pub id: PeerId,
    pub distance: Distance,
    pub state: PeerState,
    /// Peer whose response introduced this one; `None` for seeds
    pub referred_by: Option<PeerId>,
}

/// State of an iterative lookup: a set of peers, each labelled with a state
pub struct QueryPeerSet {
    target: Key,
    all: Vec<QueryPeerRecord>,
    /// Position of each peer in `all`
    index: HashMap<PeerId, usize>,
    /// `all` is in ranking order
    sorted: bool,
    ranking: Ranking,
    stats: ScorerStats,
}

impl QueryPeerSet {
    /// Create an empty set ranking peers by distance to `target`
    pub fn new(target: Key) -> Self {
        Self::with_ranking(target, Ranking::Distance)
    }

    pub fn with_ranking(target: Key, ranking: Ranking) -> Self {
        Self {
            target,
            all: Vec::new(),
            index: HashMap::new(),
            sorted: true,
            ranking,
            stats: ScorerStats::default(),
        }
    }

    pub fn target(&self) -> &Key {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Scorer agreement counters for this lookup (zero when unscored)
    pub fn scorer_stats(&self) -> ScorerStats {
        self.stats
    }

    pub fn get(&self, id: &PeerId) -> Result<&QueryPeerRecord, PeerSetError> {
        self.find(id).map(|pos| &self.all[pos])
    }

    pub fn state(&self, id: &PeerId) -> Result<PeerState, PeerSetError> {
        self.get(id).map(|record| record.state)
    }

    pub fn referrer(&self, id: &PeerId) -> Result<Option<PeerId>, PeerSetError> {
        self.get(id).map(|record| record.referred_by.clone())
    }

    pub fn distance(&self, id: &PeerId) -> Result<Distance, PeerSetError> {
        self.get(id).map(|record| record.distance)
    }

    /// Add `id` as Heard unless it is already present.
    ///
    /// Returns true iff the peer was not already present.
    pub fn try_add(&mut self, id: PeerId, referred_by: Option<PeerId>) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }

        let distance = id.point().distance(self.target.point());
        self.index.insert(id.clone(), self.all.len());
        self.all.push(QueryPeerRecord {
            id,
            distance,
            state: PeerState::Heard,
            referred_by,
        });
        self.sorted = false;

        true
    }

    pub fn set_state(&mut self, id: &PeerId, state: PeerState) -> Result<(), PeerSetError> {
        let pos = self.find(id)?;
        self.all[pos].state = state;
        Ok(())
    }

    /// Up to `n` peers in one of `states`, best ranked first
    pub fn closest_n_in_states(&mut self, n: usize, states: &[PeerState]) -> Vec<PeerId> {
        self.sort();
        self.all
            .iter()
            .filter(|record| states.contains(&record.state))
            .take(n)
            .map(|record| record.id.clone())
            .collect()
    }

    /// Every peer in one of `states`, best ranked first
    pub fn closest_in_states(&mut self, states: &[PeerState]) -> Vec<PeerId> {
        self.closest_n_in_states(self.all.len(), states)
    }

    /// Up to `n` peers in one of `states` by plain distance, whatever the
    /// ranking. Does not touch the cached ranking order.
    pub fn closest_n_by_distance(&self, n: usize, states: &[PeerState]) -> Vec<PeerId> {
        let mut matching: Vec<&QueryPeerRecord> = self
            .all
            .iter()
            .filter(|record| states.contains(&record.state))
            .collect();
        matching.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        matching
            .into_iter()
            .take(n)
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn num_heard(&self) -> usize {
        self.count_in_state(PeerState::Heard)
    }

    pub fn num_waiting(&self) -> usize {
        self.count_in_state(PeerState::Waiting)
    }

    pub fn count_in_state(&self, state: PeerState) -> usize {
        self.all.iter().filter(|record| record.state == state).count()
    }

    fn find(&self, id: &PeerId) -> Result<usize, PeerSetError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| PeerSetError::UnknownPeer(id.clone()))
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }

        match &self.ranking {
            Ranking::Distance => {
                self.all
                    .sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
            }
            Ranking::Scored(scorer) => {
                let mut keyed: Vec<(f64, QueryPeerRecord)> = self
                    .all
                    .drain(..)
                    .map(|record| (scorer.score(&record.distance, &record.id), record))
                    .collect();

                let stats = &mut self.stats;
                keyed.sort_by(|(score_a, a), (score_b, b)| {
                    let by_distance = a.distance.cmp(&b.distance);
                    let by_score = score_a.total_cmp(score_b);

                    // Only strictly opposite orders count as disagreement
                    let agreed = by_distance == Ordering::Equal
                        || by_score == Ordering::Equal
                        || by_distance == by_score;
                    stats.record(agreed);
                    scorer.record_comparison(agreed);

                    by_score.then(by_distance).then_with(|| a.id.cmp(&b.id))
                });

                self.all = keyed.into_iter().map(|(_, record)| record).collect();
            }
        }

        for (pos, record) in self.all.iter().enumerate() {
            self.index.insert(record.id.clone(), pos);
        }
        self.sorted = true;
    }
}

//! Peer ranking strategies
//!
//! A lookup ranks candidate peers by XOR distance to the target unless a
//! [`PeerScorer`] is injected, in which case peers are ranked by the score
//! it assigns. Scorers only reorder peers, they never add or remove them.

use kadwalk_core::{Distance, PeerId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Re-ranks peers, typically by folding in observed latency
///
/// Lower scores rank first.
pub trait PeerScorer: Send + Sync {
    /// Ranking score for `peer` at `distance` from the lookup target
    fn score(&self, distance: &Distance, peer: &PeerId) -> f64;

    /// Called for every pairwise comparison made while sorting, with whether
    /// the score order agreed with the plain distance order
    fn record_comparison(&self, _agreed: bool) {}

    /// Called with the round-trip time of every successful query
    fn record_latency(&self, _peer: &PeerId, _rtt: Duration) {}
}

/// How a peer set orders its peers
#[derive(Clone, Default)]
pub enum Ranking {
    /// Ascending XOR distance
    #[default]
    Distance,
    /// Ascending scorer output, ties broken by distance
    Scored(Arc<dyn PeerScorer>),
}

impl Ranking {
    pub fn scored(scorer: Arc<dyn PeerScorer>) -> Self {
        Ranking::Scored(scorer)
    }

    /// Forward a latency sample to the scorer, if any
    pub fn record_latency(&self, peer: &PeerId, rtt: Duration) {
        if let Ranking::Scored(scorer) = self {
            scorer.record_latency(peer, rtt);
        }
    }
}

impl fmt::Debug for Ranking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ranking::Distance => write!(f, "Ranking::Distance"),
            Ranking::Scored(_) => write!(f, "Ranking::Scored"),
        }
    }
}

/// How often scored ordering diverged from distance ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScorerStats {
    /// Pairwise comparisons made while sorting
    pub comparisons: u64,
    /// Comparisons where score and distance gave strictly opposite orders
    pub disagreements: u64,
}

impl ScorerStats {
    pub fn record(&mut self, agreed: bool) {
        self.comparisons += 1;
        if !agreed {
            self.disagreements += 1;
        }
    }

    /// Fraction of comparisons that disagreed, 0 when nothing was compared
    pub fn disagreement_rate(&self) -> f64 {
        if self.comparisons == 0 {
            return 0.0;
        }
        self.disagreements as f64 / self.comparisons as f64
    }
}

/// Scores peers by distance scaled with their smoothed round-trip time
///
/// `score = distance * (1 + ewma_rtt / reference)`. Peers never measured
/// are assumed to sit at `reference` latency.
pub struct LatencyScorer {
    reference: Duration,
    smoothing: f64,
    rtt_ms: Mutex<HashMap<PeerId, f64>>,
    comparisons: AtomicU64,
    disagreements: AtomicU64,
}

impl LatencyScorer {
    pub fn new(reference: Duration) -> Self {
        Self {
            reference,
            smoothing: 0.3,
            rtt_ms: Mutex::new(HashMap::new()),
            comparisons: AtomicU64::new(0),
            disagreements: AtomicU64::new(0),
        }
    }

    /// Smoothed round-trip time for a peer, if it was ever measured
    pub fn rtt(&self, peer: &PeerId) -> Option<Duration> {
        self.rtt_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    /// Comparison counters accumulated over every lookup using this scorer
    pub fn stats(&self) -> ScorerStats {
        ScorerStats {
            comparisons: self.comparisons.load(Ordering::Relaxed),
            disagreements: self.disagreements.load(Ordering::Relaxed),
        }
    }

    fn reference_ms(&self) -> f64 {
        (self.reference.as_secs_f64() * 1000.0).max(f64::MIN_POSITIVE)
    }
}

impl Default for LatencyScorer {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl PeerScorer for LatencyScorer {
    fn score(&self, distance: &Distance, peer: &PeerId) -> f64 {
        let reference = self.reference_ms();
        let rtt = self
            .rtt_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .copied()
            .unwrap_or(reference);
        distance.to_f64() * (1.0 + rtt / reference)
    }

    fn record_comparison(&self, agreed: bool) {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
        if !agreed {
            self.disagreements.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_latency(&self, peer: &PeerId, rtt: Duration) {
        let sample = rtt.as_secs_f64() * 1000.0;
        let mut table = self.rtt_ms.lock().unwrap_or_else(|e| e.into_inner());
        table
            .entry(peer.clone())
            .and_modify(|ewma| *ewma = self.smoothing * sample + (1.0 - self.smoothing) * *ewma)
            .or_insert(sample);
    }
}

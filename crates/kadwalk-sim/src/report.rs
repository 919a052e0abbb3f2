//! Running a lookup against a simulation and summarizing it

use crate::config::LookupSection;
use crate::network::Simulation;
use anyhow::Result;
use kadwalk_core::{CancelToken, Key, PeerId};
use kadwalk_dht::{LatencyScorer, LookupContext, LookupEngine, LookupError, LookupResult};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a lookup ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    StoppedEarly,
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupReport {
    /// Key as given on the command line
    pub key: String,
    /// Hex of the key's position in the key space
    pub target: String,
    pub outcome: Outcome,
    /// Closest queried peers, hex encoded
    pub peers: Vec<String>,
    pub unreachable: usize,
    pub tracked: usize,
    pub queried: usize,
    /// How many of `peers` are among the truly closest peers
    pub accuracy: f64,
    pub scorer_comparisons: u64,
    pub scorer_disagreement_rate: f64,
    pub elapsed_ms: u64,
}

impl LookupReport {
    fn new(
        key: &str,
        target: &Key,
        outcome: Outcome,
        result: &LookupResult,
        truth: &[PeerId],
        elapsed: Duration,
    ) -> Self {
        let truth: HashSet<&PeerId> = truth.iter().collect();
        let hits = result.peers.iter().filter(|p| truth.contains(p)).count();
        let accuracy = if truth.is_empty() {
            0.0
        } else {
            hits as f64 / truth.len() as f64
        };

        Self {
            key: key.to_string(),
            target: hex::encode(target.point().as_bytes()),
            outcome,
            peers: result.peers.iter().map(PeerId::to_hex).collect(),
            unreachable: result.unreachable.len(),
            tracked: result.stats.tracked,
            queried: result.stats.queried,
            accuracy,
            scorer_comparisons: result.stats.scorer.comparisons,
            scorer_disagreement_rate: result.stats.scorer.disagreement_rate(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Human readable summary, one fact per line
    pub fn print(&self) {
        println!("Lookup: {}", self.key);
        println!("Target: {}", self.target);
        println!("Outcome: {:?}", self.outcome);
        println!(
            "Peers: {} found, {} unreachable, {} tracked, {} queried",
            self.peers.len(),
            self.unreachable,
            self.tracked,
            self.queried
        );
        println!("Accuracy: {:.0}%", self.accuracy * 100.0);
        if self.scorer_comparisons > 0 {
            println!(
                "Scorer: {} comparisons, {:.1}% disagreed with distance",
                self.scorer_comparisons,
                self.scorer_disagreement_rate * 100.0
            );
        }
        println!("Elapsed: {}ms", self.elapsed_ms);
        println!();
        for (i, peer) in self.peers.iter().enumerate() {
            println!("{:>3}. {}", i + 1, peer);
        }
    }
}

/// Look up `key` in `sim`, turning interruptions into a partial report
pub async fn run_lookup(
    sim: &Simulation,
    lookup: &LookupSection,
    key: &str,
    cancel: CancelToken,
) -> Result<LookupReport> {
    let target = Key::new(key)?;

    let mut engine = LookupEngine::new(
        sim.network.clone(),
        sim.routing.clone(),
        lookup.lookup_config(),
    );
    if lookup.latency_scorer {
        let reference = Duration::from_millis(lookup.scorer_reference_ms);
        engine = engine.with_scorer(Arc::new(LatencyScorer::new(reference)));
    }

    let mut ctx = LookupContext::new().with_cancel(cancel);
    if let Some(timeout) = lookup.lookup_timeout() {
        ctx = ctx.with_timeout(timeout);
    }

    let started = Instant::now();
    let (outcome, result) = match engine.find_closest(&target, &ctx).await {
        Ok(result) if result.completed => (Outcome::Completed, result),
        Ok(result) => (Outcome::StoppedEarly, result),
        Err(LookupError::Cancelled { partial }) => (Outcome::Cancelled, partial),
        Err(LookupError::DeadlineExceeded { partial }) => (Outcome::DeadlineExceeded, partial),
        Err(e) => return Err(e.into()),
    };
    let elapsed = started.elapsed();

    let truth = sim.true_closest(&target, lookup.k);
    Ok(LookupReport::new(key, &target, outcome, &result, &truth, elapsed))
}

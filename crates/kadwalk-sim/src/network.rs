//! Simulated peer network
//!
//! Builds a random in-memory network from a [`NetworkConfig`], plus the
//! local routing table a lookup seeds from.

use crate::config::NetworkConfig;
use anyhow::{anyhow, ensure, Result};
use kadwalk_core::transport::mock::{Behavior, MockNetwork};
use kadwalk_core::{Key, PeerId};
use kadwalk_dht::routing::NodeInfo;
use kadwalk_dht::RoutingTable;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A random network and the routing table of the node running lookups
pub struct Simulation {
    pub network: Arc<MockNetwork>,
    pub routing: Arc<RwLock<RoutingTable>>,
    /// Every peer in the network
    pub peers: Vec<PeerId>,
    pub failing: usize,
    pub hanging: usize,
}

fn random_u64() -> Result<u64> {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!("Failed to generate random bytes: {}", e))?;
    Ok(u64::from_le_bytes(buf))
}

/// Uniform index in `0..n`
fn random_index(n: usize) -> Result<usize> {
    Ok((random_u64()? % n as u64) as usize)
}

/// Uniform fraction in `[0, 1)`
fn random_fraction() -> Result<f64> {
    Ok((random_u64()? >> 11) as f64 / (1u64 << 53) as f64)
}

impl Simulation {
    /// Build a network as described by `config`, with a local table of size `k`
    pub fn build(config: &NetworkConfig, k: usize) -> Result<Self> {
        let n = config.peers;
        ensure!(n >= 2, "network needs at least 2 peers");
        let peers = (0..n)
            .map(|_| PeerId::random())
            .collect::<kadwalk_core::Result<Vec<_>>>()?;
        let network = Arc::new(MockNetwork::new());

        let (mut failing, mut hanging) = (0, 0);
        let latency_span = config.max_latency_ms.saturating_sub(config.min_latency_ms);

        for (i, peer) in peers.iter().enumerate() {
            // Ring link keeps the whole network reachable from any seed
            network.link(peer, &peers[(i + 1) % n]);
            for _ in 0..config.links_per_peer {
                let other = &peers[random_index(n)?];
                if other != peer {
                    network.link(peer, other);
                }
            }

            let jitter = if latency_span == 0 {
                0
            } else {
                random_u64()? % latency_span.saturating_add(1)
            };
            network.set_latency(peer, Duration::from_millis(config.min_latency_ms + jitter));

            let roll = random_fraction()?;
            if roll < config.failure_rate {
                network.set_behavior(peer, Behavior::Fail);
                failing += 1;
            } else if roll < config.failure_rate + config.hang_rate {
                network.set_behavior(peer, Behavior::Hang);
                hanging += 1;
            }
        }

        // Walk the peers from a random offset; full buckets just skip
        let mut table = RoutingTable::new(PeerId::random()?, k);
        let offset = random_index(n)?;
        for i in 0..n {
            if table.len() >= config.seeds {
                break;
            }
            table.upsert(NodeInfo::new(peers[(offset + i) % n].clone()));
        }

        tracing::debug!(peers = n, seeds = table.len(), failing, hanging, "built simulated network");

        Ok(Self {
            network,
            routing: Arc::new(RwLock::new(table)),
            peers,
            failing,
            hanging,
        })
    }

    /// The `k` peers truly closest to `target`, whether reachable or not
    pub fn true_closest(&self, target: &Key, k: usize) -> Vec<PeerId> {
        let mut sorted = self.peers.clone();
        sorted.sort_by_key(|p| p.point().distance(target.point()));
        sorted.truncate(k);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_small_network() {
        let config = NetworkConfig {
            peers: 30,
            links_per_peer: 3,
            seeds: 5,
            failure_rate: 0.0,
            hang_rate: 0.0,
            min_latency_ms: 0,
            max_latency_ms: 0,
        };

        let sim = Simulation::build(&config, 20).unwrap();
        assert_eq!(sim.peers.len(), 30);
        assert_eq!(sim.network.peer_ids().len(), 30);
        assert_eq!(sim.routing.read().unwrap().len(), 5);
        assert_eq!(sim.failing + sim.hanging, 0);
    }

    #[test]
    fn test_true_closest_sorted() {
        let sim = Simulation::build(&NetworkConfig::default(), 20).unwrap();
        let target = Key::new(b"x").unwrap();

        let closest = sim.true_closest(&target, 20);
        assert_eq!(closest.len(), 20);
        for pair in closest.windows(2) {
            assert!(
                pair[0].point().distance(target.point()) <= pair[1].point().distance(target.point())
            );
        }
    }

    #[test]
    fn test_full_latency_range_does_not_overflow() {
        let config = NetworkConfig {
            peers: 4,
            seeds: 2,
            min_latency_ms: 0,
            max_latency_ms: u64::MAX,
            ..NetworkConfig::default()
        };

        let sim = Simulation::build(&config, 20).unwrap();
        assert_eq!(sim.peers.len(), 4);
    }

    #[test]
    fn test_fraction_in_range() {
        for _ in 0..100 {
            let f = random_fraction().unwrap();
            assert!((0.0..1.0).contains(&f));
        }
    }
}

//! Query transport abstraction
//!
//! The lookup engine never talks to the network itself. It asks a
//! [`PeerQuery`] implementation to send a FIND_NODE style request to one
//! peer and hand back the closer peers it answered with. This keeps:
//! - real transports (QUIC, UDP, mixnets) out of the lookup core
//! - the in-memory [`mock::MockNetwork`] usable for tests and simulation

use crate::{Key, PeerId, PeerInfo, Result};
use std::future::Future;

/// Asks a single peer for peers closer to a target
///
/// Implementations must be safe to call concurrently for distinct peers.
/// Retries and backoff, if any, belong here and not in the lookup.
pub trait PeerQuery: Send + Sync + 'static {
    /// Ask `peer` for the peers it knows closest to `target`
    fn find_closer(
        &self,
        peer: &PeerId,
        target: &Key,
    ) -> impl Future<Output = Result<Vec<PeerInfo>>> + Send;
}

pub mod mock {
    //! In-memory peer graph for tests and simulation

    use super::*;
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// How a mock peer answers queries
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Behavior {
        /// Answers with its neighbours after its latency
        Responsive,
        /// Fails after its latency
        Fail,
        /// Never answers
        Hang,
    }

    #[derive(Debug, Clone)]
    struct MockPeer {
        neighbors: Vec<PeerInfo>,
        latency: Duration,
        behavior: Behavior,
    }

    /// A static peer graph answering queries from memory
    ///
    /// Each peer answers every query with its full neighbour list, whatever
    /// the target. The network also records how many queries were in flight
    /// at once so tests can check concurrency bounds.
    #[derive(Default)]
    pub struct MockNetwork {
        peers: Mutex<HashMap<PeerId, MockPeer>>,
        /// Queries sent, in order
        queries: Mutex<Vec<PeerId>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockNetwork {
        /// Create an empty network
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a responsive peer with no neighbours yet
        pub fn add_peer(&self, id: PeerId) {
            self.peers
                .lock()
                .unwrap()
                .entry(id)
                .or_insert_with(|| MockPeer {
                    neighbors: Vec::new(),
                    latency: Duration::ZERO,
                    behavior: Behavior::Responsive,
                });
        }

        /// Make `from` answer with `to` among its neighbours
        pub fn link(&self, from: &PeerId, to: &PeerId) {
            self.add_peer(from.clone());
            self.add_peer(to.clone());
            let mut peers = self.peers.lock().unwrap();
            if let Some(peer) = peers.get_mut(from) {
                if !peer.neighbors.iter().any(|n| n.id == *to) {
                    peer.neighbors.push(PeerInfo::with_addrs(
                        to.clone(),
                        vec![format!("mem://{}", to.to_hex())],
                    ));
                }
            }
        }

        pub fn set_latency(&self, id: &PeerId, latency: Duration) {
            self.add_peer(id.clone());
            if let Some(peer) = self.peers.lock().unwrap().get_mut(id) {
                peer.latency = latency;
            }
        }

        pub fn set_behavior(&self, id: &PeerId, behavior: Behavior) {
            self.add_peer(id.clone());
            if let Some(peer) = self.peers.lock().unwrap().get_mut(id) {
                peer.behavior = behavior;
            }
        }

        /// All peers in the graph
        pub fn peer_ids(&self) -> Vec<PeerId> {
            self.peers.lock().unwrap().keys().cloned().collect()
        }

        /// Peers queried so far, in dispatch order
        pub fn queried(&self) -> Vec<PeerId> {
            self.queries.lock().unwrap().clone()
        }

        /// Highest number of queries observed in flight at the same time
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn lookup(&self, peer: &PeerId) -> Option<MockPeer> {
            self.peers.lock().unwrap().get(peer).cloned()
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl PeerQuery for MockNetwork {
        async fn find_closer(&self, peer: &PeerId, _target: &Key) -> Result<Vec<PeerInfo>> {
            self.queries.lock().unwrap().push(peer.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let Some(mock) = self.lookup(peer) else {
                return Err(Error::Unreachable(peer.to_string()));
            };

            if !mock.latency.is_zero() {
                tokio::time::sleep(mock.latency).await;
            }

            match mock.behavior {
                Behavior::Responsive => {
                    tracing::trace!(%peer, closer = mock.neighbors.len(), "mock response");
                    Ok(mock.neighbors)
                }
                Behavior::Fail => Err(Error::Transport(format!("{} refused", peer))),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Err(Error::Unreachable(peer.to_string()))
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn peer(name: &str) -> PeerId {
            PeerId::new(name.as_bytes()).unwrap()
        }

        #[tokio::test]
        async fn test_mock_returns_neighbors() {
            let network = MockNetwork::new();
            let (a, b) = (peer("a"), peer("b"));
            network.link(&a, &b);
            network.link(&a, &b);

            let target = Key::new(b"target").unwrap();
            let closer = network.find_closer(&a, &target).await.unwrap();

            assert_eq!(closer.len(), 1);
            assert_eq!(closer[0].id, b);
            assert_eq!(network.queried(), vec![a]);
        }

        #[tokio::test]
        async fn test_mock_unknown_peer_unreachable() {
            let network = MockNetwork::new();
            let target = Key::new(b"target").unwrap();

            let result = network.find_closer(&peer("ghost"), &target).await;
            assert!(matches!(result, Err(Error::Unreachable(_))));
        }

        #[tokio::test]
        async fn test_mock_failing_peer() {
            let network = MockNetwork::new();
            let a = peer("a");
            network.set_behavior(&a, Behavior::Fail);

            let target = Key::new(b"target").unwrap();
            assert!(network.find_closer(&a, &target).await.is_err());
            assert_eq!(network.max_in_flight(), 1);
        }
    }
}

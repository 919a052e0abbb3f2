//! Kademlia routing table
//!
//! The lookup only needs two things from long-lived routing state: seed
//! peers for a target and a place to record that a lookup into a bucket
//! succeeded. Both are expressed by [`PeerRouting`]. [`RoutingTable`] is an
//! in-memory k-bucket implementation of it.

use kadwalk_core::{Key, PeerId, Point, KEY_BITS};
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::SystemTime;

/// Routing-table collaborator used by the lookup engine
pub trait PeerRouting: Send + Sync + 'static {
    /// Peers to start a lookup for `target` from
    fn seed_peers(&self, target: &Key) -> Vec<PeerId>;

    /// Record that a lookup for `target` completed successfully at `at`
    fn refresh_last_success(&self, target: &Key, at: SystemTime);

    /// Number of peers a lookup result is truncated to
    fn bucket_size(&self) -> usize;
}

/// Information about a peer in the routing table
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: PeerId,
    pub addrs: Vec<String>,
    pub last_seen: SystemTime,
}

impl NodeInfo {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
            last_seen: SystemTime::now(),
        }
    }
}

/// A k-bucket in the routing table
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Maximum number of nodes in this bucket
    k: usize,
    /// Nodes in this bucket, ordered by last seen (most recent at back)
    nodes: VecDeque<NodeInfo>,
    /// Last time a lookup into this bucket completed
    refreshed_at: Option<SystemTime>,
}

impl KBucket {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            nodes: VecDeque::with_capacity(k),
            refreshed_at: None,
        }
    }

    /// Add or update a node in the bucket
    /// Returns true if the node was added/updated, false if bucket is full
    pub fn upsert(&mut self, node: NodeInfo) -> bool {
        if let Some(pos) = self.nodes.iter().position(|n| n.id == node.id) {
            // Move to back (most recently seen)
            self.nodes.remove(pos);
            self.nodes.push_back(node);
            return true;
        }

        if self.nodes.len() < self.k {
            self.nodes.push_back(node);
            return true;
        }

        false
    }

    /// Get all nodes in the bucket
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if bucket is full
    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.k
    }

    pub fn refreshed_at(&self) -> Option<SystemTime> {
        self.refreshed_at
    }
}

/// Kademlia routing table
///
/// Buckets are indexed by the length of the prefix a peer shares with the
/// local id, so bucket 0 holds the furthest half of the key space.
pub struct RoutingTable {
    local_id: PeerId,
    /// One bucket per common-prefix length
    buckets: Vec<KBucket>,
    k: usize,
}

impl RoutingTable {
    pub fn new(local_id: PeerId, k: usize) -> Self {
        Self {
            local_id,
            buckets: (0..KEY_BITS).map(|_| KBucket::new(k)).collect(),
            k,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Bucket `target` falls into
    pub fn bucket_for(&self, target: &Key) -> &KBucket {
        &self.buckets[self.bucket_index(target.point())]
    }

    /// Add or update a node in the routing table
    ///
    /// Returns false for the local id and for full buckets.
    pub fn upsert(&mut self, node: NodeInfo) -> bool {
        if node.id == self.local_id {
            return false;
        }
        let idx = self.bucket_index(node.id.point());
        self.buckets[idx].upsert(node)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(KBucket::is_empty)
    }

    /// Find the `count` closest nodes to a target
    pub fn closest_nodes(&self, target: &Key, count: usize) -> Vec<NodeInfo> {
        let mut all_nodes: Vec<_> = self
            .buckets
            .iter()
            .flat_map(|b| b.nodes())
            .cloned()
            .collect();

        all_nodes.sort_by_key(|n| n.id.point().distance(target.point()));
        all_nodes.truncate(count);
        all_nodes
    }

    /// Mark the bucket `target` falls into as refreshed at `at`
    pub fn reset_refreshed_at(&mut self, target: &Key, at: SystemTime) {
        let idx = self.bucket_index(target.point());
        self.buckets[idx].refreshed_at = Some(at);
    }

    // The local id itself (prefix length KEY_BITS) shares the last bucket
    fn bucket_index(&self, point: &Point) -> usize {
        let cpl = self.local_id.point().distance(point).common_prefix_len();
        cpl.min(KEY_BITS - 1)
    }
}

impl PeerRouting for RwLock<RoutingTable> {
    fn seed_peers(&self, target: &Key) -> Vec<PeerId> {
        let table = self.read().unwrap_or_else(|e| e.into_inner());
        table
            .closest_nodes(target, table.k())
            .into_iter()
            .map(|n| n.id)
            .collect()
    }

    fn refresh_last_success(&self, target: &Key, at: SystemTime) {
        self.write()
            .unwrap_or_else(|e| e.into_inner())
            .reset_refreshed_at(target, at);
    }

    fn bucket_size(&self) -> usize {
        self.read().unwrap_or_else(|e| e.into_inner()).k()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name.as_bytes()).unwrap()
    }

    #[test]
    fn test_bucket_upsert_and_full() {
        let mut bucket = KBucket::new(2);
        assert!(bucket.upsert(NodeInfo::new(peer("a"))));
        assert!(bucket.upsert(NodeInfo::new(peer("b"))));
        assert!(bucket.is_full());
        assert!(!bucket.upsert(NodeInfo::new(peer("c"))));

        // Re-seen node moves to the back
        assert!(bucket.upsert(NodeInfo::new(peer("a"))));
        let order: Vec<_> = bucket.nodes().map(|n| n.id.clone()).collect();
        assert_eq!(order, vec![peer("b"), peer("a")]);
    }

    #[test]
    fn test_table_rejects_local_id() {
        let local = peer("local");
        let mut table = RoutingTable::new(local.clone(), 20);
        assert!(!table.upsert(NodeInfo::new(local)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_closest_nodes_sorted_and_truncated() {
        let mut table = RoutingTable::new(peer("local"), 20);
        for i in 0..50 {
            table.upsert(NodeInfo::new(peer(&format!("node-{i}"))));
        }
        let target = Key::new(b"target").unwrap();

        let closest = table.closest_nodes(&target, 10);
        assert_eq!(closest.len(), 10);

        let distances: Vec<_> = closest
            .iter()
            .map(|n| n.id.point().distance(target.point()))
            .collect();
        let mut sorted = distances.clone();
        sorted.sort();
        assert_eq!(distances, sorted);
    }

    #[test]
    fn test_refresh_last_success_marks_bucket() {
        let table = RwLock::new(RoutingTable::new(peer("local"), 20));
        let target = Key::new(b"target").unwrap();
        let now = SystemTime::now();

        assert!(table.read().unwrap().bucket_for(&target).refreshed_at().is_none());
        table.refresh_last_success(&target, now);
        assert_eq!(
            table.read().unwrap().bucket_for(&target).refreshed_at(),
            Some(now)
        );
        assert_eq!(table.bucket_size(), 20);
    }
}

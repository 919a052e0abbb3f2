//! Iterative closest-peer lookup
//!
//! A lookup is driven by one coordinator that owns the [`QueryPeerSet`].
//! Queries run on up to `alpha` worker tasks and report back to the
//! coordinator over a channel, so every state transition and every new
//! candidate is applied by the coordinator in arrival order.
//!
//! The loop, per pass:
//! 1. stop on cancellation, deadline, stop predicate, peer cap, or when no
//!    peer is Heard or Waiting
//! 2. move the closest Heard peers to Waiting until `alpha` are in flight
//! 3. wait for the next worker report (or cancellation) and fold it in

use crate::config::LookupConfig;
use crate::peerset::{PeerState, QueryPeerSet};
use crate::routing::PeerRouting;
use crate::scorer::{PeerScorer, Ranking, ScorerStats};
use crate::{LookupError, Result};
use kadwalk_core::{CancelToken, Key, PeerId, PeerInfo, PeerQuery};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Successfully queried peers, closest first, at most one bucket's worth
    pub peers: Vec<PeerId>,
    /// Peers whose query failed or timed out, closest first
    pub unreachable: Vec<PeerId>,
    /// True iff the lookup ran out of peers to try
    pub completed: bool,
    pub stats: LookupStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    /// Peers discovered, seeds included
    pub tracked: usize,
    pub queried: usize,
    pub unreachable: usize,
    /// Scorer agreement counters, zero when ranking by distance
    pub scorer: ScorerStats,
}

/// Progress notifications emitted while a lookup runs
#[derive(Debug, Clone)]
pub enum QueryEvent {
    SendingQuery { peer: PeerId },
    PeerResponse { peer: PeerId, closer: Vec<PeerInfo> },
    QueryError { peer: PeerId, error: kadwalk_core::Error },
}

type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Caller-side controls for one lookup
#[derive(Clone, Default)]
pub struct LookupContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
    stop: Option<StopPredicate>,
    events: Option<mpsc::UnboundedSender<QueryEvent>>,
}

impl LookupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe an existing cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Give up `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop early once `stop` returns true. Polled once per dispatch pass.
    pub fn with_stop<F>(mut self, stop: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.stop = Some(Arc::new(stop));
        self
    }

    /// Send a [`QueryEvent`] for every query sent, answered, or failed
    pub fn with_events(mut self, events: mpsc::UnboundedSender<QueryEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn emit(&self, event: QueryEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn should_stop(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| stop())
    }
}

/// Why the dispatch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    /// Nothing Heard, nothing Waiting
    Exhausted,
    StopPredicate,
    PeerCap,
    Cancelled,
    Deadline,
}

/// A worker's report back to the coordinator
struct QueryReport {
    peer: PeerId,
    outcome: kadwalk_core::Result<Vec<PeerInfo>>,
    rtt: Duration,
}

/// Guarantees exactly one report per dispatched query.
///
/// If the worker is dropped before reporting (the query panicked), the drop
/// reports a failure so the peer does not stay Waiting forever.
struct Reporter {
    peer: PeerId,
    tx: Option<mpsc::UnboundedSender<QueryReport>>,
}

impl Reporter {
    fn report(mut self, outcome: kadwalk_core::Result<Vec<PeerInfo>>, rtt: Duration) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(QueryReport {
                peer: self.peer.clone(),
                outcome,
                rtt,
            });
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(QueryReport {
                peer: self.peer.clone(),
                outcome: Err(kadwalk_core::Error::Transport(
                    "query task dropped".to_string(),
                )),
                rtt: Duration::ZERO,
            });
        }
    }
}

/// Runs iterative closest-peer lookups
pub struct LookupEngine<Q, R> {
    query: Arc<Q>,
    routing: Arc<R>,
    config: LookupConfig,
    ranking: Ranking,
}

impl<Q: PeerQuery, R: PeerRouting> LookupEngine<Q, R> {
    pub fn new(query: Arc<Q>, routing: Arc<R>, config: LookupConfig) -> Self {
        Self {
            query,
            routing,
            config,
            ranking: Ranking::Distance,
        }
    }

    /// Rank candidates with `scorer` instead of plain distance
    pub fn with_scorer(mut self, scorer: Arc<dyn PeerScorer>) -> Self {
        self.ranking = Ranking::Scored(scorer);
        self
    }

    pub fn with_ranking(mut self, ranking: Ranking) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// Find the peers closest to `key`.
    ///
    /// An empty key is rejected before any network activity. If the lookup is
    /// cancelled or its deadline passes, the error carries the closest peers
    /// found so far.
    pub async fn get_closest_peers(&self, key: &[u8], ctx: &LookupContext) -> Result<LookupResult> {
        let target = Key::new(key).map_err(|_| LookupError::EmptyKey)?;
        self.find_closest(&target, ctx).await
    }

    /// Find the peers closest to an already validated target
    pub async fn find_closest(&self, target: &Key, ctx: &LookupContext) -> Result<LookupResult> {
        self.config.validate()?;

        let mut peers = QueryPeerSet::with_ranking(target.clone(), self.ranking.clone());
        for seed in self.routing.seed_peers(target) {
            peers.try_add(seed, None);
        }
        debug!(?target, seeds = peers.len(), "starting lookup");

        let (tx, mut rx) = mpsc::unbounded_channel();
        // Dropping the set aborts queries still in flight when we return
        let mut workers = JoinSet::new();

        let termination = loop {
            if let Some(termination) = self.check_termination(&peers, ctx) {
                break termination;
            }

            self.dispatch(&mut peers, target, &tx, &mut workers, ctx)?;

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break Termination::Cancelled,
                _ = deadline_elapsed(ctx.deadline) => break Termination::Deadline,
                // The coordinator holds a sender, so recv never yields None
                Some(report) = rx.recv() => {
                    self.fold_in(&mut peers, report, ctx)?;
                    while workers.try_join_next().is_some() {}
                }
            }
        };

        let result = self.collect(&peers, termination);
        info!(
            ?target,
            ?termination,
            tracked = result.stats.tracked,
            queried = result.stats.queried,
            unreachable = result.stats.unreachable,
            "lookup finished"
        );

        match termination {
            Termination::Cancelled => Err(LookupError::Cancelled { partial: result }),
            Termination::Deadline => Err(LookupError::DeadlineExceeded { partial: result }),
            Termination::Exhausted => {
                self.routing.refresh_last_success(target, SystemTime::now());
                Ok(result)
            }
            Termination::StopPredicate | Termination::PeerCap => Ok(result),
        }
    }

    fn check_termination(&self, peers: &QueryPeerSet, ctx: &LookupContext) -> Option<Termination> {
        if ctx.cancel.is_cancelled() {
            return Some(Termination::Cancelled);
        }
        if ctx.deadline_passed() {
            return Some(Termination::Deadline);
        }
        if ctx.should_stop() {
            return Some(Termination::StopPredicate);
        }
        if self
            .config
            .max_tracked_peers
            .is_some_and(|cap| peers.len() > cap)
        {
            return Some(Termination::PeerCap);
        }
        if peers.num_heard() == 0 && peers.num_waiting() == 0 {
            return Some(Termination::Exhausted);
        }
        None
    }

    /// Fill free query slots with the closest Heard peers
    fn dispatch(
        &self,
        peers: &mut QueryPeerSet,
        target: &Key,
        tx: &mpsc::UnboundedSender<QueryReport>,
        workers: &mut JoinSet<()>,
        ctx: &LookupContext,
    ) -> Result<()> {
        let slots = self.config.alpha.saturating_sub(peers.num_waiting());
        if slots == 0 {
            return Ok(());
        }

        for peer in peers.closest_n_in_states(slots, &[PeerState::Heard]) {
            peers.set_state(&peer, PeerState::Waiting)?;
            debug!(%peer, "sending query");
            ctx.emit(QueryEvent::SendingQuery { peer: peer.clone() });

            let query = Arc::clone(&self.query);
            let target = target.clone();
            let timeout = self.config.query_timeout;
            let reporter = Reporter {
                peer,
                tx: Some(tx.clone()),
            };

            workers.spawn(async move {
                let started = Instant::now();
                let outcome =
                    match tokio::time::timeout(timeout, query.find_closer(&reporter.peer, &target))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(kadwalk_core::Error::Timeout(timeout)),
                    };
                reporter.report(outcome, started.elapsed());
            });
        }

        Ok(())
    }

    /// Apply one worker report to the peer set
    fn fold_in(
        &self,
        peers: &mut QueryPeerSet,
        report: QueryReport,
        ctx: &LookupContext,
    ) -> Result<()> {
        let QueryReport { peer, outcome, rtt } = report;

        if let Err(e) = peers.state(&peer) {
            warn!(%peer, "report for a peer the lookup never dispatched");
            return Err(e.into());
        }

        match outcome {
            Ok(closer) => {
                peers.set_state(&peer, PeerState::Queried)?;
                self.ranking.record_latency(&peer, rtt);

                let mut added = 0;
                for info in &closer {
                    if peers.try_add(info.id.clone(), Some(peer.clone())) {
                        added += 1;
                    }
                }
                debug!(%peer, ?rtt, returned = closer.len(), added, "query answered");
                ctx.emit(QueryEvent::PeerResponse { peer, closer });
            }
            Err(error) => {
                peers.set_state(&peer, PeerState::Unreachable)?;
                debug!(%peer, %error, "query failed");
                ctx.emit(QueryEvent::QueryError { peer, error });
            }
        }

        Ok(())
    }

    fn collect(&self, peers: &QueryPeerSet, termination: Termination) -> LookupResult {
        let k = self.routing.bucket_size();
        let queried = peers.count_in_state(PeerState::Queried);
        let unreachable = peers.count_in_state(PeerState::Unreachable);

        LookupResult {
            peers: peers.closest_n_by_distance(k, &[PeerState::Queried]),
            unreachable: peers.closest_n_by_distance(unreachable, &[PeerState::Unreachable]),
            completed: termination == Termination::Exhausted,
            stats: LookupStats {
                tracked: peers.len(),
                queried,
                unreachable,
                scorer: peers.scorer_stats(),
            },
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{NodeInfo, RoutingTable};
    use kadwalk_core::transport::mock::{Behavior, MockNetwork};
    use kadwalk_core::{Distance, Point, KEY_BYTES};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;

    fn target() -> Key {
        Key::from_point(Point::from_bytes([0u8; KEY_BYTES]))
    }

    fn peer_at(distance: u64) -> PeerId {
        PeerId::from_point(Point::from_bytes(*Distance::from_u64(distance).as_bytes()))
    }

    fn routing(seeds: &[PeerId]) -> Arc<RwLock<RoutingTable>> {
        let local = PeerId::new(b"local").unwrap();
        let mut table = RoutingTable::new(local, 20);
        for seed in seeds {
            table.upsert(NodeInfo::new(seed.clone()));
        }
        Arc::new(RwLock::new(table))
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_network() {
        let network = Arc::new(MockNetwork::new());
        let engine = LookupEngine::new(
            network.clone(),
            routing(&[peer_at(1)]),
            LookupConfig::default(),
        );

        let result = engine.get_closest_peers(b"", &LookupContext::new()).await;
        assert!(matches!(result, Err(LookupError::EmptyKey)));
        assert!(network.queried().is_empty());
    }

    #[tokio::test]
    async fn test_referral_scenario() {
        let (a, b, c, d) = (peer_at(5), peer_at(3), peer_at(9), peer_at(1));
        let network = Arc::new(MockNetwork::new());
        network.add_peer(a.clone());
        network.link(&b, &d);
        network.set_behavior(&c, Behavior::Fail);

        let routing = routing(&[a.clone(), b.clone(), c.clone()]);
        let engine = LookupEngine::new(network.clone(), routing.clone(), LookupConfig::default());

        let result = engine.find_closest(&target(), &LookupContext::new()).await.unwrap();

        assert!(result.completed);
        assert_eq!(result.peers, vec![d, b, a]);
        assert_eq!(result.unreachable, vec![c]);
        assert_eq!(result.stats.tracked, 4);

        let refreshed = routing.read().unwrap().bucket_for(&target()).refreshed_at();
        assert!(refreshed.is_some());
    }

    #[tokio::test]
    async fn test_no_seeds_completes_empty() {
        let engine = LookupEngine::new(
            Arc::new(MockNetwork::new()),
            routing(&[]),
            LookupConfig::default(),
        );

        let result = engine.find_closest(&target(), &LookupContext::new()).await.unwrap();
        assert!(result.completed);
        assert!(result.peers.is_empty());
    }

    #[tokio::test]
    async fn test_stop_predicate_ends_early() {
        let network = Arc::new(MockNetwork::new());
        for d in 1..=10 {
            network.link(&peer_at(d), &peer_at(d + 10));
        }
        let seeds: Vec<_> = (1..=10).map(peer_at).collect();
        let engine = LookupEngine::new(
            network.clone(),
            routing(&seeds),
            LookupConfig::default().with_alpha(1),
        );

        let passes = Arc::new(AtomicUsize::new(0));
        let counter = passes.clone();
        let ctx = LookupContext::new().with_stop(move || counter.fetch_add(1, Ordering::SeqCst) >= 3);

        let result = engine.find_closest(&target(), &ctx).await.unwrap();
        assert!(!result.completed);
        assert!(network.queried().len() <= 3);
        assert!(!result.peers.is_empty());
    }

    #[tokio::test]
    async fn test_query_timeout_marks_unreachable() {
        let (fast, slow) = (peer_at(2), peer_at(1));
        let network = Arc::new(MockNetwork::new());
        network.add_peer(fast.clone());
        network.set_behavior(&slow, Behavior::Hang);

        let engine = LookupEngine::new(
            network,
            routing(&[fast.clone(), slow.clone()]),
            LookupConfig::default().with_query_timeout(Duration::from_millis(50)),
        );

        let result = engine.find_closest(&target(), &LookupContext::new()).await.unwrap();
        assert!(result.completed);
        assert_eq!(result.peers, vec![fast]);
        assert_eq!(result.unreachable, vec![slow]);
    }

    #[tokio::test]
    async fn test_events_follow_queries() {
        let (a, b) = (peer_at(4), peer_at(2));
        let network = Arc::new(MockNetwork::new());
        network.link(&a, &b);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = LookupEngine::new(network, routing(&[a.clone()]), LookupConfig::default());
        engine
            .find_closest(&target(), &LookupContext::new().with_events(tx))
            .await
            .unwrap();

        let mut sent = Vec::new();
        let mut answered = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                QueryEvent::SendingQuery { peer } => sent.push(peer),
                QueryEvent::PeerResponse { peer, .. } => answered.push(peer),
                QueryEvent::QueryError { peer, .. } => panic!("unexpected failure for {peer}"),
            }
        }
        assert_eq!(sent, vec![a.clone(), b.clone()]);
        assert_eq!(answered, vec![a, b]);
    }

    /// Answers with no peers, except for one peer whose query panics
    struct Panicky {
        bad: PeerId,
    }

    impl PeerQuery for Panicky {
        async fn find_closer(
            &self,
            peer: &PeerId,
            _target: &Key,
        ) -> kadwalk_core::Result<Vec<PeerInfo>> {
            if *peer == self.bad {
                panic!("transport bug");
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_panicking_query_marks_unreachable() {
        let (bad, b, c) = (peer_at(1), peer_at(2), peer_at(3));
        let query = Arc::new(Panicky { bad: bad.clone() });
        let engine = LookupEngine::new(
            query,
            routing(&[bad.clone(), b.clone(), c.clone()]),
            LookupConfig::default(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.find_closest(&target(), &LookupContext::new().with_events(tx)),
        )
        .await
        .expect("lookup stalled on a dead worker")
        .unwrap();

        assert!(result.completed);
        assert_eq!(result.peers, vec![b, c]);
        assert_eq!(result.unreachable, vec![bad.clone()]);

        let mut failed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let QueryEvent::QueryError { peer, .. } = event {
                failed.push(peer);
            }
        }
        assert_eq!(failed, vec![bad]);
    }
}

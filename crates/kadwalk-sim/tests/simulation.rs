//! Integration tests for the kadwalk simulator
//!
//! These build small random networks and run full lookups through the
//! same path the `kadwalk lookup` command takes.

use kadwalk_core::CancelToken;
use kadwalk_sim::config::{Config, LookupSection, NetworkConfig};
use kadwalk_sim::{run_lookup, Outcome, Simulation};
use tempfile::TempDir;

fn healthy_network(peers: usize) -> NetworkConfig {
    NetworkConfig {
        peers,
        links_per_peer: 4,
        seeds: 5,
        failure_rate: 0.0,
        hang_rate: 0.0,
        min_latency_ms: 0,
        max_latency_ms: 3,
    }
}

#[tokio::test]
async fn test_healthy_network_finds_true_closest() {
    let lookup = LookupSection {
        k: 8,
        ..Default::default()
    };
    let sim = Simulation::build(&healthy_network(120), lookup.k).unwrap();

    let report = run_lookup(&sim, &lookup, "some-file", CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.peers.len(), 8);
    assert_eq!(report.accuracy, 1.0);
    assert_eq!(report.unreachable, 0);
    assert!(report.queried <= report.tracked);
}

#[tokio::test]
async fn test_latency_scorer_reports_comparisons() {
    let lookup = LookupSection {
        k: 8,
        latency_scorer: true,
        scorer_reference_ms: 2,
        ..Default::default()
    };
    let sim = Simulation::build(&healthy_network(80), lookup.k).unwrap();

    let report = run_lookup(&sim, &lookup, "scored", CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.accuracy, 1.0);
    assert!(report.scorer_comparisons > 0);
}

#[tokio::test]
async fn test_cancelled_lookup_reports_partial() {
    let lookup = LookupSection::default();
    let sim = Simulation::build(&healthy_network(50), lookup.k).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = run_lookup(&sim, &lookup, "never", cancel).await.unwrap();

    assert_eq!(report.outcome, Outcome::Cancelled);
    assert!(report.peers.is_empty());
    assert_eq!(report.queried, 0);
}

#[tokio::test]
async fn test_hanging_network_hits_deadline() {
    let network = NetworkConfig {
        hang_rate: 1.0,
        ..healthy_network(20)
    };
    let lookup = LookupSection {
        query_timeout_ms: 5_000,
        lookup_timeout_ms: Some(100),
        ..Default::default()
    };
    let sim = Simulation::build(&network, lookup.k).unwrap();

    let report = run_lookup(&sim, &lookup, "stuck", CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::DeadlineExceeded);
    assert!(report.peers.is_empty());
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let lookup = LookupSection::default();
    let sim = Simulation::build(&healthy_network(10), lookup.k).unwrap();

    assert!(run_lookup(&sim, &lookup, "", CancelToken::new()).await.is_err());
}

#[test]
fn test_config_file_drives_simulation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[lookup]\nk = 4\n\n[network]\npeers = 12\nseeds = 3\nfailure_rate = 0.0\nhang_rate = 0.0\n",
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let sim = Simulation::build(&config.network, config.lookup.k).unwrap();

    assert_eq!(sim.peers.len(), 12);
    assert_eq!(sim.routing.read().unwrap().len(), 3);
}

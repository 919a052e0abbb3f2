//! Simulator configuration

use kadwalk_dht::config::{DEFAULT_ALPHA, DEFAULT_BUCKET_SIZE};
use kadwalk_dht::LookupConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for simulated per-peer latency
pub const MAX_LATENCY_MS: u64 = 60_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Lookup engine configuration
    #[serde(default)]
    pub lookup: LookupSection,

    /// Simulated network configuration
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSection {
    /// Alpha parameter (lookup parallelism)
    pub alpha: usize,
    /// K parameter (nodes per bucket, result size)
    pub k: usize,
    /// Per-query timeout in milliseconds
    pub query_timeout_ms: u64,
    /// Whole-lookup timeout in milliseconds
    pub lookup_timeout_ms: Option<u64>,
    /// Stop after discovering this many peers
    pub max_tracked_peers: Option<usize>,
    /// Rank candidates with the latency scorer
    pub latency_scorer: bool,
    /// Latency the scorer treats as neutral, in milliseconds
    pub scorer_reference_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of simulated peers
    pub peers: usize,
    /// Random neighbours per peer
    pub links_per_peer: usize,
    /// Peers placed in the local routing table
    pub seeds: usize,
    /// Fraction of peers that refuse queries
    pub failure_rate: f64,
    /// Fraction of peers that never answer
    pub hang_rate: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl Default for LookupSection {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            k: DEFAULT_BUCKET_SIZE,
            query_timeout_ms: 2_000,
            lookup_timeout_ms: Some(30_000),
            max_tracked_peers: None,
            latency_scorer: false,
            scorer_reference_ms: 100,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peers: 500,
            links_per_peer: 8,
            seeds: 10,
            failure_rate: 0.05,
            hang_rate: 0.02,
            min_latency_ms: 5,
            max_latency_ms: 120,
        }
    }
}

impl LookupSection {
    pub fn lookup_config(&self) -> LookupConfig {
        LookupConfig {
            alpha: self.alpha,
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            max_tracked_peers: self.max_tracked_peers,
        }
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lookup
            .lookup_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.lookup.k == 0 {
            return Err(ConfigError::Invalid("k must be at least 1".to_string()));
        }
        if let Some(lookup_ms) = self.lookup.lookup_timeout_ms {
            if lookup_ms <= self.lookup.query_timeout_ms {
                return Err(ConfigError::Invalid(
                    "lookup timeout must be longer than the query timeout".to_string(),
                ));
            }
        }

        let net = &self.network;
        if net.peers < 2 {
            return Err(ConfigError::Invalid("network needs at least 2 peers".to_string()));
        }
        if net.seeds == 0 || net.seeds > net.peers {
            return Err(ConfigError::Invalid(format!(
                "seeds must be between 1 and {}",
                net.peers
            )));
        }
        if !(0.0..=1.0).contains(&net.failure_rate)
            || !(0.0..=1.0).contains(&net.hang_rate)
            || net.failure_rate + net.hang_rate > 1.0
        {
            return Err(ConfigError::Invalid(
                "failure and hang rates must be fractions summing to at most 1".to_string(),
            ));
        }
        if net.max_latency_ms > MAX_LATENCY_MS {
            return Err(ConfigError::Invalid(format!(
                "max latency must be at most {}ms",
                MAX_LATENCY_MS
            )));
        }
        if net.min_latency_ms > net.max_latency_ms {
            return Err(ConfigError::Invalid(
                "min latency exceeds max latency".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand ~ in a path
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

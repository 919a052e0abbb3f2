//! Lookup configuration

use crate::{LookupError, Result};
use std::time::Duration;

/// Default lookup parallelism
pub const DEFAULT_ALPHA: usize = 3;

/// Default number of peers per k-bucket
pub const DEFAULT_BUCKET_SIZE: usize = 20;

/// Default per-query timeout
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Lookup engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupConfig {
    /// Maximum number of queries in flight at once
    pub alpha: usize,
    /// Timeout for a single peer query.
    ///
    /// Independent of, and expected to be shorter than, the overall lookup
    /// deadline carried by the lookup context.
    pub query_timeout: Duration,
    /// Stop early once this many peers have been discovered
    pub max_tracked_peers: Option<usize>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_tracked_peers: None,
        }
    }
}

impl LookupConfig {
    pub fn with_alpha(mut self, alpha: usize) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_max_tracked_peers(mut self, max: usize) -> Self {
        self.max_tracked_peers = Some(max);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.alpha == 0 {
            return Err(LookupError::InvalidConfig("alpha must be at least 1".to_string()));
        }
        if self.query_timeout.is_zero() {
            return Err(LookupError::InvalidConfig(
                "query timeout must be positive".to_string(),
            ));
        }
        if self.max_tracked_peers == Some(0) {
            return Err(LookupError::InvalidConfig(
                "max tracked peers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

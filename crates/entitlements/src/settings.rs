//! Engine tunables

use std::time::Duration as StdDuration;

use seatkeeper_shared::Deployment;
use time::Duration;

use crate::purchase::CLEANUP_DELAY_PERIOD;

/// Purchases refreshed longer ago than this are candidates again
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::hours(20);

pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 50;

pub const DEFAULT_REFRESH_BATCH_LIMIT: usize = 50;

pub const DEFAULT_LEASE_TTL: StdDuration = StdDuration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub deployment: Deployment,
    pub staleness_threshold: Duration,
    pub cleanup_delay: Duration,
    pub cleanup_batch_size: usize,
    pub refresh_batch_limit: usize,
    pub lease_ttl: StdDuration,
    /// Attempts per purchase after the first failure
    pub retry_attempts: usize,
    pub retry_base_millis: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            deployment: Deployment::default(),
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            cleanup_delay: CLEANUP_DELAY_PERIOD,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            refresh_batch_limit: DEFAULT_REFRESH_BATCH_LIMIT,
            lease_ttl: DEFAULT_LEASE_TTL,
            retry_attempts: 3,
            retry_base_millis: 100,
        }
    }
}

impl EngineSettings {
    pub fn for_deployment(deployment: Deployment) -> Self {
        Self {
            deployment,
            ..Self::default()
        }
    }
}

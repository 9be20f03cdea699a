//! Service configuration and tuning constants

use std::net::SocketAddr;
use std::time::Duration;

/// Pending writes the queue holds before producers start blocking.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Writes folded into one store transaction before the batch commits early.
pub const DEFAULT_MAX_BATCH: usize = 256;

/// How long a partial batch lingers after its first write before committing.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Commit retries after the first failed attempt, then the batch is dropped.
pub const DEFAULT_COMMIT_RETRIES: u32 = 3;

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Every accepted page URL must carry this prefix.
pub const DEFAULT_URL_PREFIX: &str = "https://en.wikipedia.org/wiki/";

/// Region assumed for phone numbers submitted without one.
pub const DEFAULT_REGION: &str = "US";

/// Batch writer tuning.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub queue_capacity: usize,
    pub max_batch: usize,
    pub flush_interval: Duration,
    pub commit_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_batch: DEFAULT_MAX_BATCH,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Full service configuration as the binary wires it.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub url_prefix: String,
    pub default_region: String,
    pub identity_cache_capacity: usize,
    pub page_cache_capacity: usize,
    pub probe_timeout: Duration,
    pub writer: WriterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            url_prefix: DEFAULT_URL_PREFIX.to_string(),
            default_region: DEFAULT_REGION.to_string(),
            identity_cache_capacity: DEFAULT_CACHE_CAPACITY,
            page_cache_capacity: DEFAULT_CACHE_CAPACITY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            writer: WriterConfig::default(),
        }
    }
}

//! Loader configuration
//!
//! Everything here is resolved once at startup and stays read-only for the
//! whole run. The shard table in particular is never reloaded mid-run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::marker::MarkPolicy;

// ============================================================================
// Defaults
// ============================================================================

/// Default input pattern.
pub const DEFAULT_PATTERN: &str = "/data/appsinstalled/*.tsv.gz";

/// Default memcached address for `idfa` devices.
pub const DEFAULT_IDFA_ADDR: &str = "127.0.0.1:33013";

/// Default memcached address for `gaid` devices.
pub const DEFAULT_GAID_ADDR: &str = "127.0.0.1:33014";

/// Default memcached address for `adid` devices.
pub const DEFAULT_ADID_ADDR: &str = "127.0.0.1:33015";

/// Default memcached address for `dvid` devices.
pub const DEFAULT_DVID_ADDR: &str = "127.0.0.1:33016";

/// Default number of writer workers per file.
pub const DEFAULT_WORKERS: usize = 4;

/// Default work queue capacity per file.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of files loaded at the same time.
pub const DEFAULT_MAX_PARALLEL_FILES: usize = 4;

/// Error rate at or above which a file load is reported as failed.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.01;

/// Default per-write timeout in milliseconds.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1_000;

/// Default number of retries after a transient write failure.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default first backoff delay in milliseconds.
pub const DEFAULT_RETRY_BASE_MS: u64 = 100;

/// Upper bound for a single backoff delay in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Static mapping from device type to the memcached shard that owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardTable(BTreeMap<String, String>);

impl ShardTable {
    /// The four standard device types on their default local ports
    pub fn with_defaults() -> Self {
        [
            ("idfa", DEFAULT_IDFA_ADDR),
            ("gaid", DEFAULT_GAID_ADDR),
            ("adid", DEFAULT_ADID_ADDR),
            ("dvid", DEFAULT_DVID_ADDR),
        ]
        .into_iter()
        .collect()
    }

    /// Add or replace the shard for a device type
    pub fn insert(&mut self, dev_type: impl Into<String>, addr: impl Into<String>) {
        self.0.insert(dev_type.into(), addr.into());
    }

    pub fn get(&self, dev_type: &str) -> Option<&str> {
        self.0.get(dev_type).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ShardTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Parse a `TYPE=HOST:PORT` shard override
pub fn parse_shard_entry(s: &str) -> Result<(String, String), String> {
    let (dev_type, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=HOST:PORT, got '{s}'"))?;
    let (dev_type, addr) = (dev_type.trim(), addr.trim());
    if dev_type.is_empty() || addr.is_empty() {
        return Err(format!("expected TYPE=HOST:PORT, got '{s}'"));
    }
    Ok((dev_type.to_string(), addr.to_string()))
}

/// Bounded exponential backoff for transient write failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exactly one attempt per write
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

/// Per-file writer pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Concurrent workers draining one file's queue
    pub workers: usize,
    /// Queue slots between the producer and the workers
    pub queue_capacity: usize,
    /// Upper bound for one connect + set round trip
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
    /// Log writes instead of sending them
    pub dry_run: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }
}

/// Main loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Glob pattern selecting input files
    pub pattern: String,
    pub shards: ShardTable,
    pub writer: WriterConfig,
    /// Files loaded concurrently
    pub max_parallel_files: usize,
    /// Error rate at or above which a file counts as failed
    pub error_threshold: f64,
    pub mark_policy: MarkPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            shards: ShardTable::with_defaults(),
            writer: WriterConfig::default(),
            max_parallel_files: DEFAULT_MAX_PARALLEL_FILES,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            mark_policy: MarkPolicy::default(),
        }
    }
}

impl LoaderConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pattern.trim().is_empty() {
            anyhow::bail!("Input pattern cannot be empty");
        }

        if self.shards.is_empty() {
            anyhow::bail!("At least one device type must be mapped to a memcached address");
        }

        if let Some((dev_type, _)) = self.shards.iter().find(|(_, addr)| addr.trim().is_empty()) {
            anyhow::bail!("Memcached address for device type '{}' is empty", dev_type);
        }

        if self.writer.workers == 0 {
            anyhow::bail!("Writer workers must be greater than 0");
        }

        if self.writer.queue_capacity == 0 {
            anyhow::bail!("Queue capacity must be greater than 0");
        }

        if self.writer.write_timeout.is_zero() {
            anyhow::bail!("Write timeout must be greater than 0");
        }

        if self.max_parallel_files == 0 {
            anyhow::bail!("Max parallel files must be greater than 0");
        }

        if !(self.error_threshold > 0.0 && self.error_threshold <= 1.0) {
            anyhow::bail!(
                "Error threshold must be within (0, 1], got {}",
                self.error_threshold
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shards.len(), 4);
        assert_eq!(config.shards.get("gaid"), Some(DEFAULT_GAID_ADDR));
        assert_eq!(config.mark_policy, MarkPolicy::Always);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = LoaderConfig::default();
        config.writer.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = LoaderConfig::default();
        config.error_threshold = 0.0;
        assert!(config.validate().is_err());
        config.error_threshold = 1.5;
        assert!(config.validate().is_err());
        config.error_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_shard_address() {
        let mut config = LoaderConfig::default();
        config.shards.insert("idfa", "  ");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idfa"));
    }

    #[test]
    fn test_parse_shard_entry() {
        assert_eq!(
            parse_shard_entry("oaid=10.0.0.5:11211").unwrap(),
            ("oaid".to_string(), "10.0.0.5:11211".to_string())
        );
        assert!(parse_shard_entry("oaid").is_err());
        assert!(parse_shard_entry("=10.0.0.5:11211").is_err());
        assert!(parse_shard_entry("oaid=").is_err());
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }
}

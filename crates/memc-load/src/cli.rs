//! Command-line interface
//!
//! Every option can also come from the environment (or a `.env` file).

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    parse_shard_entry, LoaderConfig, RetryPolicy, ShardTable, WriterConfig, DEFAULT_ADID_ADDR,
    DEFAULT_DVID_ADDR, DEFAULT_ERROR_THRESHOLD, DEFAULT_GAID_ADDR, DEFAULT_IDFA_ADDR,
    DEFAULT_MAX_PARALLEL_FILES, DEFAULT_MAX_RETRIES, DEFAULT_PATTERN, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_WORKERS, DEFAULT_WRITE_TIMEOUT_MS,
};
use crate::marker::MarkPolicy;

#[derive(Parser, Debug)]
#[command(name = "memc-load")]
#[command(author, version, about = "Load installed-apps logs into sharded memcached")]
pub struct Cli {
    /// Round-trip a built-in sample through the codec and exit
    #[arg(short, long)]
    pub test: bool,

    /// Write logs to this file instead of stdout
    #[arg(short, long, env = "MEMC_LOAD_LOG")]
    pub log: Option<PathBuf>,

    /// Log writes instead of sending them (also enables debug logging)
    #[arg(long, env = "MEMC_LOAD_DRY")]
    pub dry: bool,

    /// Glob pattern of gzip-compressed TSV input files
    #[arg(long, env = "MEMC_LOAD_PATTERN", default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// memcached address for idfa devices
    #[arg(long, env = "MEMC_LOAD_IDFA", default_value = DEFAULT_IDFA_ADDR)]
    pub idfa: String,

    /// memcached address for gaid devices
    #[arg(long, env = "MEMC_LOAD_GAID", default_value = DEFAULT_GAID_ADDR)]
    pub gaid: String,

    /// memcached address for adid devices
    #[arg(long, env = "MEMC_LOAD_ADID", default_value = DEFAULT_ADID_ADDR)]
    pub adid: String,

    /// memcached address for dvid devices
    #[arg(long, env = "MEMC_LOAD_DVID", default_value = DEFAULT_DVID_ADDR)]
    pub dvid: String,

    /// Extra or overriding shard, as TYPE=HOST:PORT (repeatable)
    #[arg(long = "shard", value_name = "TYPE=HOST:PORT", value_parser = parse_shard_entry)]
    pub shards: Vec<(String, String)>,

    /// Writer workers per file
    #[arg(long, env = "MEMC_LOAD_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Queued records per file before the reader waits
    #[arg(long, env = "MEMC_LOAD_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Files loaded at the same time
    #[arg(long, env = "MEMC_LOAD_MAX_PARALLEL_FILES", default_value_t = DEFAULT_MAX_PARALLEL_FILES)]
    pub max_parallel_files: usize,

    /// Error rate at or above which a file load fails
    #[arg(long, env = "MEMC_LOAD_ERROR_THRESHOLD", default_value_t = DEFAULT_ERROR_THRESHOLD)]
    pub error_threshold: f64,

    /// Which finished files get renamed with a leading dot
    #[arg(long, env = "MEMC_LOAD_MARK_POLICY", value_enum, default_value_t = MarkPolicy::Always)]
    pub mark_policy: MarkPolicy,

    /// Timeout for one memcached write, in milliseconds
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT_MS)]
    pub write_timeout_ms: u64,

    /// Retries after a connection fault or timeout
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles per retry
    #[arg(long, default_value_t = DEFAULT_RETRY_BASE_MS)]
    pub retry_base_ms: u64,
}

impl Cli {
    /// Resolve the loader configuration described by the arguments
    pub fn loader_config(&self) -> LoaderConfig {
        let mut shards: ShardTable = [
            ("idfa", self.idfa.as_str()),
            ("gaid", self.gaid.as_str()),
            ("adid", self.adid.as_str()),
            ("dvid", self.dvid.as_str()),
        ]
        .into_iter()
        .collect();
        for (dev_type, addr) in &self.shards {
            shards.insert(dev_type.clone(), addr.clone());
        }

        LoaderConfig {
            pattern: self.pattern.clone(),
            shards,
            writer: WriterConfig {
                workers: self.workers,
                queue_capacity: self.queue_capacity,
                write_timeout: Duration::from_millis(self.write_timeout_ms),
                retry: RetryPolicy {
                    max_retries: self.max_retries,
                    base_delay: Duration::from_millis(self.retry_base_ms),
                    max_delay: Duration::from_millis(
                        DEFAULT_RETRY_MAX_DELAY_MS.max(self.retry_base_ms),
                    ),
                },
                dry_run: self.dry,
            },
            max_parallel_files: self.max_parallel_files,
            error_threshold: self.error_threshold,
            mark_policy: self.mark_policy,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_loader_defaults() {
        let cli = Cli::try_parse_from(["memc-load"]).unwrap();
        assert!(!cli.test);
        assert!(!cli.dry);
        assert_eq!(cli.loader_config(), LoaderConfig::default());
    }

    #[test]
    fn test_shard_overrides_and_extras() {
        let cli = Cli::try_parse_from([
            "memc-load",
            "--idfa",
            "10.0.0.1:11211",
            "--shard",
            "oaid=10.0.0.9:11211",
            "--shard",
            "gaid=10.0.0.2:11211",
        ])
        .unwrap();

        let config = cli.loader_config();
        assert_eq!(config.shards.get("idfa"), Some("10.0.0.1:11211"));
        assert_eq!(config.shards.get("gaid"), Some("10.0.0.2:11211"));
        assert_eq!(config.shards.get("oaid"), Some("10.0.0.9:11211"));
        assert_eq!(config.shards.len(), 5);
    }

    #[test]
    fn test_pipeline_tuning_flags() {
        let cli = Cli::try_parse_from([
            "memc-load",
            "--dry",
            "--pattern",
            "/tmp/in/*.tsv.gz",
            "--workers",
            "8",
            "--mark-policy",
            "on-success",
            "--write-timeout-ms",
            "250",
        ])
        .unwrap();

        let config = cli.loader_config();
        assert!(config.writer.dry_run);
        assert_eq!(config.pattern, "/tmp/in/*.tsv.gz");
        assert_eq!(config.writer.workers, 8);
        assert_eq!(config.mark_policy, MarkPolicy::OnSuccess);
        assert_eq!(config.writer.write_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_shard_is_rejected() {
        assert!(Cli::try_parse_from(["memc-load", "--shard", "oaid"]).is_err());
    }
}

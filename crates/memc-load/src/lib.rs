//! memc-load Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads gzip-compressed installed-apps logs into memcached, one shard per
//! device type.
//!
//! # Pipeline
//!
//! Every input file gets its own pipeline:
//!
//! ```text
//! lines -> parse/route/encode -> bounded queue -> K writers -> error-rate gate -> marker
//! ```
//!
//! The [`supervisor`] runs several of these at once and never shares state
//! between them.
//!
//! # Example
//!
//! ```no_run
//! use memc_load::config::LoaderConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = LoaderConfig::default();
//!     config.pattern = "/data/appsinstalled/*.tsv.gz".to_string();
//!     config.writer.dry_run = true;
//!
//!     let summary = memc_load::run(&config).await?;
//!     println!("{} files, all ok: {}", summary.files.len(), summary.all_succeeded());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod codec;
pub mod config;
pub mod gate;
pub mod input;
pub mod marker;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod router;
pub mod store;
pub mod supervisor;
pub mod worker;

use std::sync::Arc;

pub use config::LoaderConfig;
pub use supervisor::{RunSummary, Supervisor};

use pipeline::FilePipeline;
use store::MemcacheConnector;

/// Validate `config` and load every matching file into memcached
pub async fn run(config: &LoaderConfig) -> anyhow::Result<RunSummary> {
    config.validate()?;

    let pipeline = FilePipeline::from_config(config, Arc::new(MemcacheConnector));
    let supervisor = Supervisor::new(pipeline, config.max_parallel_files);

    Ok(supervisor.run_pattern(&config.pattern).await?)
}

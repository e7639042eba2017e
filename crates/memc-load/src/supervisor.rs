//! Run supervisor
//!
//! Expands the input pattern and runs one isolated [`FilePipeline`] task per
//! file, at most `max_parallel_files` at a time. The supervisor only launches
//! and awaits pipelines; their counters and queues stay private to them.

use glob::{glob_with, MatchOptions};
use memc_common::{MemcError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::marker::is_marked;
use crate::pipeline::{FilePipeline, FileReport};
use crate::store::StoreConnector;

/// How one file's pipeline ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Ran to the gate; the verdict may still be a failure
    Completed(FileReport),
    /// Stopped by an unhandled fault
    Aborted { path: PathBuf, error: String },
}

impl FileOutcome {
    pub fn path(&self) -> &PathBuf {
        match self {
            FileOutcome::Completed(report) => &report.path,
            FileOutcome::Aborted { path, .. } => path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Completed(report) if report.verdict.is_success())
    }
}

/// Per-file outcomes of a run, sorted by path
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub files: Vec<FileOutcome>,
}

impl RunSummary {
    /// Files that were rejected, empty or aborted
    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|outcome| !outcome.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Expand `pattern` into the sorted list of files still to load.
///
/// Dot-files never match, so files already marked as processed are skipped
/// even by patterns like `*`.
pub fn discover_inputs(pattern: &str) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };

    let entries = glob_with(pattern, options).map_err(|e| MemcError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() && !is_marked(&path) => files.push(path),
            Ok(_) => {},
            Err(e) => warn!(error = %e, "Skipping unreadable glob entry"),
        }
    }

    files.sort();
    Ok(files)
}

pub struct Supervisor<C: StoreConnector> {
    pipeline: Arc<FilePipeline<C>>,
    max_parallel_files: usize,
}

impl<C: StoreConnector> Supervisor<C> {
    pub fn new(pipeline: FilePipeline<C>, max_parallel_files: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            max_parallel_files: max_parallel_files.max(1),
        }
    }

    /// Discover inputs for `pattern` and load them all
    pub async fn run_pattern(&self, pattern: &str) -> Result<RunSummary> {
        let files = discover_inputs(pattern)?;
        if files.is_empty() {
            info!(pattern = %pattern, "No input files matched");
        } else {
            info!(pattern = %pattern, files = files.len(), "Discovered input files");
        }
        Ok(self.run(files).await)
    }

    /// Load every file concurrently and wait for all of them
    pub async fn run(&self, files: Vec<PathBuf>) -> RunSummary {
        let permits = Arc::new(Semaphore::new(self.max_parallel_files));
        let mut tasks = JoinSet::new();

        for path in files {
            let pipeline = Arc::clone(&self.pipeline);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return FileOutcome::Aborted {
                            path,
                            error: e.to_string(),
                        }
                    },
                };

                // A nested task keeps a panicking pipeline from taking the
                // path (and the outcome) down with it.
                let span = info_span!("pipeline", file = %path.display());
                let file = path.clone();
                let handle = tokio::spawn(
                    async move { pipeline.run(&file).await }.instrument(span),
                );

                match handle.await {
                    Ok(Ok(report)) => FileOutcome::Completed(report),
                    Ok(Err(e)) => {
                        error!(file = %path.display(), error = %e, "Pipeline aborted");
                        FileOutcome::Aborted {
                            path,
                            error: e.to_string(),
                        }
                    },
                    Err(join) => {
                        error!(file = %path.display(), error = %join, "Pipeline task panicked");
                        FileOutcome::Aborted {
                            path,
                            error: join.to_string(),
                        }
                    },
                }
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.files.push(outcome),
                Err(e) => error!(error = %e, "Supervisor task failed"),
            }
        }

        summary.files.sort_by(|a, b| a.path().cmp(b.path()));
        summary
    }
}

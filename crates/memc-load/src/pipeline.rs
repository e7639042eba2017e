//! One file's load: producer -> queue -> writers -> gate -> marker
//!
//! The producer runs on the blocking pool because it reads and inflates the
//! input synchronously. It owns the file handle, so the handle is closed when
//! the producer task ends, on every path, before the marker rename runs.

use futures::future::join_all;
use memc_common::MemcError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::LoaderConfig;
use crate::gate::{ErrorRateGate, FileRunState, Verdict};
use crate::input::{open_input, RawLines};
use crate::marker::{mark_processed, MarkPolicy};
use crate::queue::{work_queue, QueueClosed, QueueProducer};
use crate::record::is_blank;
use crate::router::Router;
use crate::store::StoreConnector;
use crate::worker::WriterPool;

/// Faults that abort a file's pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input failure: {0}")]
    Input(#[from] MemcError),

    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    #[error("producer task failed: {0}")]
    ProducerPanicked(String),

    #[error("{failed} of {total} writer tasks failed: {message}")]
    WorkerPanicked {
        failed: usize,
        total: usize,
        message: String,
    },

    #[error("cannot mark '{path}' as processed: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: MemcError,
    },
}

/// What the producer saw in the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerTally {
    pub lines: u64,
    pub queued: u64,
    pub rejected: u64,
}

/// Result of a pipeline that ran to completion
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub state: FileRunState,
    pub verdict: Verdict,
    /// New location when the file was marked
    pub marked_as: Option<PathBuf>,
}

/// Loads single files; shared by every pipeline of a run
pub struct FilePipeline<C: StoreConnector> {
    router: Router,
    pool: WriterPool<C>,
    gate: ErrorRateGate,
    mark_policy: MarkPolicy,
}

impl<C: StoreConnector> FilePipeline<C> {
    pub fn new(
        router: Router,
        pool: WriterPool<C>,
        gate: ErrorRateGate,
        mark_policy: MarkPolicy,
    ) -> Self {
        Self {
            router,
            pool,
            gate,
            mark_policy,
        }
    }

    pub fn from_config(config: &LoaderConfig, connector: Arc<C>) -> Self {
        Self::new(
            Router::new(Arc::new(config.shards.clone())),
            WriterPool::new(connector, config.writer.clone()),
            ErrorRateGate::new(config.error_threshold),
            config.mark_policy,
        )
    }

    /// Load one file and mark it according to the policy
    pub async fn run(&self, path: &Path) -> Result<FileReport, PipelineError> {
        let started = Instant::now();
        info!(file = %path.display(), "Processing file");

        let (producer, consumer) = work_queue(self.pool.queue_capacity(), self.pool.workers());
        let writers = self.pool.spawn(consumer);

        let router = self.router.clone();
        let input = path.to_path_buf();
        let produced = tokio::task::spawn_blocking(move || produce(&input, &router, producer)).await;

        // Writers terminate on their own: either `Done` arrived or the producer
        // dropped its half of the queue.
        let written = join_all(writers).await;

        let tally = match produced {
            Ok(result) => result?,
            Err(join) => return Err(PipelineError::ProducerPanicked(join.to_string())),
        };

        let total = written.len();
        let mut state = FileRunState {
            processed: 0,
            errors: tally.rejected,
        };
        let mut failures = Vec::new();
        for result in written {
            match result {
                Ok(worker) => state.merge(worker.into()),
                Err(join) => failures.push(join.to_string()),
            }
        }
        if !failures.is_empty() {
            return Err(PipelineError::WorkerPanicked {
                failed: failures.len(),
                total,
                message: failures.join("; "),
            });
        }

        let verdict = self.gate.evaluate(&state);
        match verdict {
            Verdict::Accepted { rate } => {
                info!(
                    file = %path.display(),
                    processed = state.processed,
                    errors = state.errors,
                    rate,
                    "Acceptable error rate. Successful load"
                );
            },
            Verdict::Rejected { rate, threshold } => {
                error!(
                    file = %path.display(),
                    processed = state.processed,
                    errors = state.errors,
                    rate,
                    threshold,
                    "High error rate. Failed load"
                );
            },
            Verdict::Empty => {
                error!(
                    file = %path.display(),
                    lines = tally.lines,
                    errors = state.errors,
                    "Nothing processed. Failed load"
                );
            },
        }

        let marked_as = if self.mark_policy.should_mark(&verdict) {
            let marked = mark_processed(path)
                .await
                .map_err(|source| PipelineError::Marker {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(file = %path.display(), marked = %marked.display(), "Marked as processed");
            Some(marked)
        } else {
            info!(
                file = %path.display(),
                policy = %self.mark_policy,
                "Left unmarked for the next run"
            );
            None
        };

        info!(
            file = %path.display(),
            lines = tally.lines,
            queued = tally.queued,
            rejected = tally.rejected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "File finished"
        );

        Ok(FileReport {
            path: path.to_path_buf(),
            state,
            verdict,
            marked_as,
        })
    }
}

/// Read every line of `path`, queue routable records, then signal `Done`
fn produce(
    path: &Path,
    router: &Router,
    queue: QueueProducer,
) -> Result<ProducerTally, PipelineError> {
    let reader = open_input(path)?;
    let mut tally = ProducerTally::default();

    for line in RawLines::new(reader) {
        let line = line.map_err(|e| MemcError::file(path, e))?;
        if is_blank(&line) {
            continue;
        }
        tally.lines += 1;

        match router.route_raw(&line) {
            Ok(item) => {
                debug!(shard = %item.shard, key = %item.key, "put in queue");
                queue.submit_blocking(item)?;
                tally.queued += 1;
            },
            Err(_) => tally.rejected += 1,
        }
    }

    queue.finish_blocking();
    Ok(tally)
}

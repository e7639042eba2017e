//! Writer workers
//!
//! Each worker drains the shared queue until it receives its termination
//! signal. It keeps one lazily opened connection per shard, so workers never
//! wait on each other's sockets. Counters are private to the worker and
//! returned as a [`WorkerTally`] when it exits.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{RetryPolicy, WriterConfig};
use crate::gate::FileRunState;
use crate::queue::QueueConsumer;
use crate::router::WorkItem;
use crate::store::{KvStore, StoreConnector, StoreError};

/// What one worker did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTally {
    pub written: u64,
    pub failed: u64,
}

impl From<WorkerTally> for FileRunState {
    fn from(tally: WorkerTally) -> Self {
        FileRunState {
            processed: tally.written,
            errors: tally.failed,
        }
    }
}

/// Spawns the writers for one file
pub struct WriterPool<C: StoreConnector> {
    connector: Arc<C>,
    config: WriterConfig,
}

impl<C: StoreConnector> WriterPool<C> {
    pub fn new(connector: Arc<C>, config: WriterConfig) -> Self {
        Self { connector, config }
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// Start `workers` tasks draining `queue`
    pub fn spawn(&self, queue: QueueConsumer) -> Vec<JoinHandle<WorkerTally>> {
        (0..self.config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    connector: Arc::clone(&self.connector),
                    connections: HashMap::new(),
                    write_timeout: self.config.write_timeout,
                    retry: self.config.retry.clone(),
                    dry_run: self.config.dry_run,
                };
                tokio::spawn(worker.run(queue.clone()))
            })
            .collect()
    }
}

struct Worker<C: StoreConnector> {
    id: usize,
    connector: Arc<C>,
    connections: HashMap<String, C::Store>,
    write_timeout: Duration,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<C: StoreConnector> Worker<C> {
    async fn run(mut self, queue: QueueConsumer) -> WorkerTally {
        let mut tally = WorkerTally::default();

        while let Some(item) = queue.next().await {
            if self.dry_run {
                debug!(worker = self.id, shard = %item.shard, key = %item.key, "Dry-run write");
                tally.written += 1;
                continue;
            }

            match self.write(&item).await {
                Ok(()) => tally.written += 1,
                Err(e) => {
                    error!(
                        worker = self.id,
                        shard = %item.shard,
                        key = %item.key,
                        kind = e.kind(),
                        error = %e,
                        "Cannot write to memcached"
                    );
                    tally.failed += 1;
                },
            }
        }

        debug!(
            worker = self.id,
            written = tally.written,
            failed = tally.failed,
            "Writer finished"
        );
        tally
    }

    /// One write with bounded retries on transient failures
    async fn write(&mut self, item: &WorkItem) -> Result<(), StoreError> {
        let mut retry = 0;
        loop {
            let attempt = tokio::time::timeout(self.write_timeout, self.try_write(item)).await;
            let err = match attempt {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => StoreError::Timeout(self.write_timeout),
            };

            // Unread reply lines would be taken as the answer to the next set
            if !err.keeps_connection() {
                self.connections.remove(&item.shard);
            }

            if !err.is_transient() || retry >= self.retry.max_retries {
                return Err(err);
            }

            let delay = self.retry.delay_for(retry);
            warn!(
                worker = self.id,
                shard = %item.shard,
                key = %item.key,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying memcached write"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn try_write(&mut self, item: &WorkItem) -> Result<(), StoreError> {
        let store = match self.connections.entry(item.shard.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.connector.connect(&item.shard).await?),
        };
        store.set(&item.key, &item.payload).await
    }
}

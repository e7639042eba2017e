//! Bounded work queue between one producer and a fixed pool of writers
//!
//! Termination is explicit: after the last item the producer sends one
//! [`QueueMessage::Done`] per worker, and a worker stops reading at the first
//! `Done` it sees. Dropping the producer without finishing closes the channel,
//! which every waiting worker also treats as termination.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::router::WorkItem;

/// Element type of the work queue
#[derive(Debug)]
pub enum QueueMessage {
    Work(WorkItem),
    /// No further work will arrive
    Done,
}

/// All workers are gone; the item could not be queued.
#[derive(Debug, thiserror::Error)]
#[error("work queue closed: no writer is left to receive items")]
pub struct QueueClosed;

/// Create a queue for `workers` consumers holding at most `capacity` messages
pub fn work_queue(capacity: usize, workers: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueProducer { tx, workers },
        QueueConsumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Sending half, owned by the single producer
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<QueueMessage>,
    workers: usize,
}

impl QueueProducer {
    /// Queue an item, waiting for a free slot
    pub async fn submit(&self, item: WorkItem) -> Result<(), QueueClosed> {
        self.tx
            .send(QueueMessage::Work(item))
            .await
            .map_err(|_| QueueClosed)
    }

    /// Queue an item from a blocking thread, waiting for a free slot
    pub fn submit_blocking(&self, item: WorkItem) -> Result<(), QueueClosed> {
        self.tx
            .blocking_send(QueueMessage::Work(item))
            .map_err(|_| QueueClosed)
    }

    /// Send one `Done` per worker and close the sending side
    pub async fn finish(self) {
        for _ in 0..self.workers {
            if self.tx.send(QueueMessage::Done).await.is_err() {
                break;
            }
        }
    }

    /// Blocking variant of [`finish`](Self::finish)
    pub fn finish_blocking(self) {
        for _ in 0..self.workers {
            if self.tx.blocking_send(QueueMessage::Done).is_err() {
                break;
            }
        }
    }
}

/// Receiving half, shared by all workers of one file
#[derive(Debug, Clone)]
pub struct QueueConsumer {
    rx: Arc<Mutex<mpsc::Receiver<QueueMessage>>>,
}

impl QueueConsumer {
    /// Next item for this worker, or `None` once it must stop.
    ///
    /// After `None` the caller must not call `next` again: the `Done` it
    /// consumed was meant for it alone.
    pub async fn next(&self) -> Option<WorkItem> {
        let message = self.rx.lock().await.recv().await;
        match message {
            Some(QueueMessage::Work(item)) => Some(item),
            Some(QueueMessage::Done) | None => None,
        }
    }
}

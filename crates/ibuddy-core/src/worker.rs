//! Fixed-size worker pool draining inbound events.
//!
//! Events from the transport go into one bounded queue; `worker_count`
//! tasks pull from it and run each event through the [`Pipeline`]. There is
//! no per-user ordering: two events of one user may run concurrently.

use crate::config::WORKER_QUEUE_CAPACITY;
use crate::event::InboundEvent;
use crate::pipeline::{Outcome, Pipeline};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors while enqueuing an event
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The pool is shut down
    #[error("worker queue is closed")]
    QueueClosed,
}

/// Running pool of pipeline workers
pub struct WorkerPool {
    sender: mpsc::Sender<InboundEvent>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Start `count` workers (at least one) sharing a bounded queue.
    ///
    /// Cancelling `cancel` stops the workers and aborts in-flight events.
    #[must_use]
    pub fn spawn(count: usize, pipeline: Arc<Pipeline>, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..count.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let pipeline = Arc::clone(&pipeline);
                let cancel = cancel.clone();
                tokio::spawn(run_worker(worker_id, receiver, pipeline, cancel))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Worker pool started");
        Self {
            sender,
            handles,
            cancel,
        }
    }

    /// Queue handle for producers
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<InboundEvent> {
        self.sender.clone()
    }

    /// Enqueue an event, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::QueueClosed` after shutdown.
    pub async fn submit(&self, event: InboundEvent) -> Result<(), WorkerError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| WorkerError::QueueClosed)
    }

    /// Cancel all workers and wait for them to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.sender);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<InboundEvent>>>,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "Worker started");
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => None,
            event = async { receiver.lock().await.recv().await } => event,
        };
        let Some(event) = next else {
            break;
        };

        tokio::select! {
            () = cancel.cancelled() => {
                warn!(worker_id, kind = event.kind(), "Event aborted by shutdown");
                break;
            }
            outcome = pipeline.process(&event) => {
                if let Outcome::Failed(stage) = outcome {
                    debug!(worker_id, stage, "Event failed");
                }
            }
        }
    }
    debug!(worker_id, "Worker stopped");
}

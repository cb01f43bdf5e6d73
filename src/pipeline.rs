//! Ingestion queue and persistence workers.
//!
//! Harvest units submit one [`PageBatch`] per completed page into a bounded
//! channel; a small set of persistence workers drains it into the store.
//! The bound is the backpressure mechanism: when storage falls behind,
//! submitters block instead of buffering pages without limit.
//!
//! End of stream is signalled by closing the channel (every queue handle
//! dropped), never by an in-band sentinel. Workers keep draining whatever
//! is already buffered after the close; the cancellation token is only for
//! emergency aborts where buffered batches may be abandoned.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::ResultRecord;
use crate::infrastructure::HarvestRepository;

/// Marker that one page of one job was fully harvested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCompletion {
    pub source_id: String,
    pub year: u16,
    pub category: Option<String>,
    pub page: u32,
    pub url: String,
}

impl PageCompletion {
    /// Category as stored in the completion key (`""` when uncategorized).
    #[must_use]
    pub fn category_key(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }
}

/// One page's worth of validated records plus its completion marker.
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub completion: PageCompletion,
    pub records: Vec<ResultRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("ingestion queue is closed")]
    Closed,
}

/// Submitting side of the bounded ingestion channel.
#[derive(Clone)]
pub struct IngestionQueue {
    tx: mpsc::Sender<PageBatch>,
    capacity: usize,
}

impl IngestionQueue {
    /// Blocks while the channel is at capacity.
    pub async fn submit(&self, batch: PageBatch) -> Result<(), QueueError> {
        self.tx.send(batch).await.map_err(|_| QueueError::Closed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Create the bounded page-batch channel.
pub fn ingestion_channel(capacity: usize) -> (IngestionQueue, mpsc::Receiver<PageBatch>) {
    let (tx, rx) = mpsc::channel(capacity);
    (IngestionQueue { tx, capacity }, rx)
}

/// Per-worker persistence counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub pages: u64,
    pub saved: u64,
    pub duplicates: u64,
    /// Batches that failed to persist. The page stays uncompleted and is
    /// re-harvested on the next run.
    pub anomalies: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.pages += other.pages;
        self.saved += other.saved;
        self.duplicates += other.duplicates;
        self.anomalies += other.anomalies;
    }
}

/// Drains page batches from the shared receiver into the repository.
pub struct PersistenceWorker {
    id: usize,
    repository: HarvestRepository,
    rx: Arc<Mutex<mpsc::Receiver<PageBatch>>>,
    cancel: CancellationToken,
}

impl PersistenceWorker {
    pub fn new(
        id: usize,
        repository: HarvestRepository,
        rx: Arc<Mutex<mpsc::Receiver<PageBatch>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            repository,
            rx,
            cancel,
        }
    }

    /// Run until the channel is closed and drained, or the token fires.
    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();

        loop {
            // Lock only long enough to receive; persisting happens outside
            // the lock so the other workers can keep pulling.
            let batch = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        warn!(worker = self.id, "persistence worker aborted");
                        return stats;
                    }
                    batch = rx.recv() => batch,
                }
            };

            let Some(batch) = batch else { break };
            self.persist(batch, &mut stats).await;
        }

        info!(
            worker = self.id,
            pages = stats.pages,
            saved = stats.saved,
            duplicates = stats.duplicates,
            anomalies = stats.anomalies,
            "persistence worker drained"
        );
        stats
    }

    async fn persist(&self, batch: PageBatch, stats: &mut WorkerStats) {
        let completion = &batch.completion;
        match self
            .repository
            .save_completion(completion, &batch.records)
            .await
        {
            Ok(outcome) => {
                stats.pages += 1;
                stats.saved += outcome.inserted;
                stats.duplicates += outcome.skipped;
            }
            Err(err) => {
                stats.anomalies += 1;
                error!(
                    worker = self.id,
                    source = %completion.source_id,
                    page = completion.page,
                    error = %err,
                    "failed to persist page batch"
                );
            }
        }
    }
}

/// Spawn `count` workers sharing one receiver.
pub fn spawn_workers(
    count: usize,
    repository: &HarvestRepository,
    rx: mpsc::Receiver<PageBatch>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<WorkerStats>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|id| {
            let worker =
                PersistenceWorker::new(id, repository.clone(), Arc::clone(&rx), cancel.clone());
            tokio::spawn(worker.run())
        })
        .collect()
}

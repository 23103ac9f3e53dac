//! Bulk orchestrator: discovery, task queue, and the worker pool.
//!
//! Discovery lists the bucket once and enqueues one task per partition
//! directory (glob mode) or per object. Workers pull tasks until a shutdown
//! sentinel arrives; transient failures put the task back on the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use snafu::ResultExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{BulkError, ListingSnafu, WorkerJoinSnafu};
use crate::pipeline::{LoadPipeline, TaskOutcome};
use crate::resume;
use crate::storage::{self, ObjectStorage};
use crate::warehouse::Warehouse;

pub const DEFAULT_DATASET: &str = "telemetry";
pub const DEFAULT_SCRATCH_DATASET: &str = "tmp";

/// One unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTask {
    pub bucket: String,
    /// Set when the task covers a whole partition directory.
    pub directory: Option<String>,
    /// A concrete object key inside the directory, or the sole object.
    pub key: String,
}

enum QueueMessage {
    Task(LoadTask),
    Shutdown,
}

/// Work queue with completion tracking.
///
/// A task counts as outstanding from push until `task_done`; requeueing a
/// task before acking the failed attempt keeps the count above zero, so
/// `join` cannot wake early.
struct TaskQueue {
    tx: UnboundedSender<QueueMessage>,
    rx: Mutex<UnboundedReceiver<QueueMessage>>,
    outstanding: AtomicUsize,
    drained: Notify,
}

impl TaskQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            outstanding: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    fn push(&self, task: LoadTask) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the queue.
        let _ = self.tx.send(QueueMessage::Task(task));
    }

    fn push_shutdown(&self) {
        let _ = self.tx.send(QueueMessage::Shutdown);
    }

    async fn pop(&self) -> Option<QueueMessage> {
        self.rx.lock().await.recv().await
    }

    fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every pushed task has been acked.
    async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Knobs for one bulk run.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Worker count.
    pub concurrency: usize,
    /// Group objects by partition directory and load each with a wildcard.
    pub glob_load: bool,
    /// Skip directories whose partitions are already in the destination.
    pub resume_load: bool,
    pub dest_dataset: String,
    pub scratch_dataset: String,
    /// Load everything into this table instead of the path-derived ids.
    pub alias: Option<String>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            glob_load: true,
            resume_load: true,
            dest_dataset: DEFAULT_DATASET.to_string(),
            scratch_dataset: DEFAULT_SCRATCH_DATASET.to_string(),
            alias: None,
        }
    }
}

/// Tallies for a completed bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub requeued: usize,
}

impl BulkSummary {
    fn absorb(&mut self, other: BulkSummary) {
        self.loaded += other.loaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.requeued += other.requeued;
    }
}

/// Load every object under `prefix` into the warehouse.
pub async fn bulk(
    storage: &ObjectStorage,
    warehouse: Arc<dyn Warehouse>,
    prefix: &str,
    options: BulkOptions,
) -> Result<BulkSummary, BulkError> {
    let entries = storage.list(prefix).await.context(ListingSnafu)?;
    info!(prefix = %prefix, objects = entries.len(), "bucket listed");

    let queue = Arc::new(TaskQueue::new());
    let bucket = storage.bucket().to_string();

    if options.glob_load {
        let mut directories = storage::latest_objects(entries);
        if options.resume_load {
            directories =
                resume::remove_loaded_objects(warehouse.as_ref(), &options.dest_dataset, directories)
                    .await?;
        }
        for (directory, entry) in directories {
            queue.push(LoadTask {
                bucket: bucket.clone(),
                directory: Some(directory),
                key: entry.key,
            });
        }
    } else {
        for key in storage::loadable_objects(entries) {
            queue.push(LoadTask {
                bucket: bucket.clone(),
                directory: None,
                key,
            });
        }
    }
    info!(tasks = queue.outstanding(), "tasks enqueued");

    let pipeline = Arc::new(LoadPipeline::new(
        warehouse,
        options.dest_dataset,
        options.scratch_dataset,
        options.alias,
    ));

    let workers = options.concurrency.max(1);
    let mut pool = JoinSet::new();
    for id in 0..workers {
        let queue = Arc::clone(&queue);
        let pipeline = Arc::clone(&pipeline);
        pool.spawn(async move { worker(id, queue, pipeline).await });
    }

    queue.join().await;
    for _ in 0..workers {
        queue.push_shutdown();
    }

    let mut summary = BulkSummary::default();
    while let Some(result) = pool.join_next().await {
        summary.absorb(result.context(WorkerJoinSnafu)?);
    }
    info!(
        loaded = summary.loaded,
        skipped = summary.skipped,
        failed = summary.failed,
        requeued = summary.requeued,
        "bulk run complete"
    );
    Ok(summary)
}

async fn worker(id: usize, queue: Arc<TaskQueue>, pipeline: Arc<LoadPipeline>) -> BulkSummary {
    let mut summary = BulkSummary::default();
    loop {
        let task = match queue.pop().await {
            Some(QueueMessage::Task(task)) => task,
            Some(QueueMessage::Shutdown) | None => break,
        };

        match pipeline.run(&task).await {
            Ok(TaskOutcome::Loaded) => summary.loaded += 1,
            Ok(TaskOutcome::Skipped) => summary.skipped += 1,
            Err(e) if e.is_transient() => {
                warn!(worker = id, key = %task.key, error = %e, "requeueing task");
                summary.requeued += 1;
                // Push before acking so the queue never drains mid-retry.
                queue.push(task);
            }
            Err(e) if e.is_structural() => {
                warn!(worker = id, key = %task.key, error = %e, "skipping malformed object");
                summary.skipped += 1;
            }
            Err(e) => {
                error!(worker = id, key = %task.key, error = %e, "task failed");
                summary.failed += 1;
            }
        }
        queue.task_done();
        info!(worker = id, remaining = queue.outstanding(), "task finished");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(key: &str) -> LoadTask {
        LoadTask {
            bucket: "bucket".to_string(),
            directory: None,
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn join_returns_once_every_task_is_acked() {
        let queue = Arc::new(TaskQueue::new());
        queue.push(task("a"));
        queue.push(task("b"));

        let worker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                while queue.outstanding() > 0 {
                    let Some(QueueMessage::Task(_)) = queue.pop().await else {
                        break;
                    };
                    queue.task_done();
                }
            })
        };

        queue.join().await;
        assert_eq!(queue.outstanding(), 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn join_on_an_empty_queue_is_immediate() {
        let queue = TaskQueue::new();
        queue.join().await;
    }

    #[tokio::test]
    async fn requeue_before_ack_keeps_the_queue_outstanding() {
        let queue = TaskQueue::new();
        queue.push(task("a"));

        let Some(QueueMessage::Task(failed)) = queue.pop().await else {
            panic!("expected a task");
        };
        queue.push(failed);
        queue.task_done();

        assert_eq!(queue.outstanding(), 1);
    }

    #[tokio::test]
    async fn shutdown_messages_do_not_count_as_tasks() {
        let queue = TaskQueue::new();
        queue.push_shutdown();
        assert_eq!(queue.outstanding(), 0);

        let message = queue.pop().await;
        assert!(matches!(message, Some(QueueMessage::Shutdown)));
    }
}

//! Background worker for bulk file deletion
//!
//! One tokio task drains an unbounded queue of jobs, one job at a time. The
//! file work of a job runs in `spawn_blocking` so the worker never blocks the
//! runtime. Each delete job owns a oneshot sender its caller awaits through
//! `BatchHandle`; prune jobs have no waiter.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::{NullProgress, ProgressSink};
use crate::infrastructure::{Location, RecordFiles};
use crate::{Result, StoreError};

/// Outcome of one bulk batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Ids whose files were deleted
    pub completed: Vec<String>,
    /// Ids that failed, with the reason
    pub failed: Vec<(String, StoreError)>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Completion of a batch submitted to the worker
#[derive(Debug)]
pub struct BatchHandle {
    total: usize,
    state: HandleState,
    rejected: Vec<(String, StoreError)>,
}

#[derive(Debug)]
enum HandleState {
    Pending(oneshot::Receiver<BatchReport>),
    Ready(BatchReport),
}

impl BatchHandle {
    /// Handle that is already complete
    pub fn ready(report: BatchReport) -> Self {
        Self {
            total: report.total(),
            state: HandleState::Ready(report),
            rejected: Vec::new(),
        }
    }

    /// Add items that failed before reaching the worker
    pub fn with_failures(mut self, failures: Vec<(String, StoreError)>) -> Self {
        self.total += failures.len();
        self.rejected.extend(failures);
        self
    }

    /// Number of items submitted in the batch
    pub fn total(&self) -> usize {
        self.total
    }

    /// Wait for the batch to finish
    pub async fn wait(self) -> Result<BatchReport> {
        let mut report = match self.state {
            HandleState::Ready(report) => report,
            HandleState::Pending(rx) => rx
                .await
                .map_err(|_| StoreError::worker("Bulk worker dropped the batch"))?,
        };
        report.failed.extend(self.rejected);
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Delete,
    Prune,
}

impl JobKind {
    fn as_str(&self) -> &'static str {
        match self {
            JobKind::Delete => "delete",
            JobKind::Prune => "prune",
        }
    }
}

struct BulkJob {
    kind: JobKind,
    items: Vec<(String, Location)>,
    sink: Arc<dyn ProgressSink>,
    done: Option<oneshot::Sender<BatchReport>>,
}

/// Single background task queue
#[derive(Debug, Clone)]
pub struct BulkWorker {
    tx: mpsc::UnboundedSender<BulkJob>,
}

impl BulkWorker {
    /// Spawn the worker task on the current tokio runtime
    pub fn spawn(files: RecordFiles) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::worker(format!("No tokio runtime for bulk worker: {}", e)))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<BulkJob>();

        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                let files = files.clone();
                let kind = job.kind;
                if let Err(e) = tokio::task::spawn_blocking(move || run_job(&files, job)).await {
                    error!("Bulk {} job panicked: {}", kind.as_str(), e);
                }
            }
            debug!("Bulk worker stopped");
        });

        Ok(Self { tx })
    }

    /// Queue deletion of `items`; progress goes to `sink`
    pub fn delete(
        &self,
        items: Vec<(String, Location)>,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<BatchHandle> {
        let total = items.len();
        let (done, rx) = oneshot::channel();
        self.submit(BulkJob {
            kind: JobKind::Delete,
            items,
            sink: sink.unwrap_or_else(|| Arc::new(NullProgress)),
            done: Some(done),
        })?;
        Ok(BatchHandle {
            total,
            state: HandleState::Pending(rx),
            rejected: Vec::new(),
        })
    }

    /// Queue deletion of stale files without a waiter
    pub fn prune(&self, items: Vec<(String, Location)>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.submit(BulkJob {
            kind: JobKind::Prune,
            items,
            sink: Arc::new(NullProgress),
            done: None,
        })
    }

    fn submit(&self, job: BulkJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| StoreError::worker("Bulk worker is not running"))
    }
}

fn run_job(files: &RecordFiles, job: BulkJob) {
    let BulkJob {
        kind,
        items,
        sink,
        done,
    } = job;
    let total = items.len();
    let mut report = BatchReport::default();

    sink.started(total);
    sink.progress(0);
    for (index, (id, location)) in items.into_iter().enumerate() {
        match files.delete(location, &id) {
            Ok(()) => report.completed.push(id),
            Err(e) => {
                warn!(
                    "Bulk {}: failed to delete {} from {}: {}",
                    kind.as_str(),
                    id,
                    location.dir_name(),
                    e
                );
                report.failed.push((id, e));
            }
        }
        sink.progress(percent(index + 1, total));
    }
    sink.finished();

    info!(
        "Bulk {} finished: {} deleted, {} failed",
        kind.as_str(),
        report.completed.len(),
        report.failed.len()
    );

    if let Some(done) = done {
        // Receiver may have been dropped by a caller that does not wait
        let _ = done.send(report);
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

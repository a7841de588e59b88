//! Upload Dispatcher
//!
//! Design principles:
//! - Fixed pool of worker tasks, spawned once and shut down once
//! - One bounded queue shared by all workers; `submit` never waits on it
//! - A full queue drops the task: a stale live segment is worth nothing
//! - No retries; every outcome is counted and optionally reported

use super::{UploadTask, Uploader};
use crate::error::UploadError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pool sizing
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Endpoint answered 200 or 201
    Uploaded,
    /// Bad status, transport error, or unreadable file
    Failed,
    /// File was rotated away before it could be read
    Superseded,
}

/// Result of one upload attempt.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub name: String,
    pub outcome: UploadOutcome,
    pub duration: Duration,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dropped: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub superseded: u64,
}

impl DispatchStats {
    pub fn finished(&self) -> u64 {
        self.uploaded + self.failed + self.superseded
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    uploaded: AtomicU64,
    failed: AtomicU64,
    superseded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable submit side of the dispatcher. Safe to use from any thread,
/// including the blocking scan loop.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::Sender<UploadTask>,
    counters: Arc<Counters>,
}

impl UploadQueue {
    /// Hand `task` to the pool without waiting. Returns `false` when the
    /// task was dropped because the queue is full or the pool is gone.
    pub fn submit(&self, task: UploadTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(task)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(file = %task.name, "Upload queue full, dropping segment");
                false
            }
            Err(TrySendError::Closed(task)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(file = %task.name, "Upload pool stopped, dropping segment");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

/// Owner of the upload worker pool.
pub struct UploadDispatcher {
    queue: UploadQueue,
    workers: Vec<JoinHandle<()>>,
}

impl UploadDispatcher {
    /// Spawn `config.workers` upload tasks on the current tokio runtime.
    ///
    /// If `reports` is given, every finished attempt is sent there.
    pub fn spawn<U: Uploader>(
        uploader: U,
        config: DispatcherConfig,
        reports: Option<mpsc::UnboundedSender<UploadReport>>,
    ) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let uploader = Arc::new(uploader);
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&uploader),
                    Arc::clone(&counters),
                    reports.clone(),
                ))
            })
            .collect();

        info!(workers, queue_capacity = config.queue_capacity, "Upload pool started");

        Self {
            queue: UploadQueue { tx, counters },
            workers: handles,
        }
    }

    pub fn submit(&self, task: UploadTask) -> bool {
        self.queue.submit(task)
    }

    /// A submit handle for the scan loop.
    pub fn queue(&self) -> UploadQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.queue.stats()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting work, give queued and in-flight uploads up to `grace`
    /// to finish, then abort whatever is left.
    ///
    /// Workers only exit once every [`UploadQueue`] clone is dropped.
    pub async fn shutdown(self, grace: Duration) -> DispatchStats {
        let UploadDispatcher { queue, mut workers } = self;
        let counters = Arc::clone(&queue.counters);
        drop(queue);

        let drained = tokio::time::timeout(grace, async {
            for handle in workers.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        if drained.is_err() {
            let stuck = workers.iter().filter(|h| !h.is_finished()).count();
            warn!(stuck, "Upload pool did not drain in {:?}, abandoning uploads", grace);
            for handle in &workers {
                handle.abort();
            }
        }

        let stats = counters.snapshot();
        info!(
            uploaded = stats.uploaded,
            failed = stats.failed,
            superseded = stats.superseded,
            dropped = stats.dropped,
            "Upload pool stopped"
        );
        stats
    }
}

async fn worker_loop<U: Uploader>(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
    uploader: Arc<U>,
    counters: Arc<Counters>,
    reports: Option<mpsc::UnboundedSender<UploadReport>>,
) {
    loop {
        // Hold the lock only while waiting for the next task.
        let next = { queue.lock().await.recv().await };
        let Some(task) = next else {
            debug!(worker_id, "Upload queue closed, worker exiting");
            return;
        };

        let name = task.name.clone();
        let started = Instant::now();
        let result = uploader.upload(task).await;
        let duration = started.elapsed();

        let outcome = classify(&name, worker_id, duration, result);
        match outcome {
            UploadOutcome::Uploaded => counters.uploaded.fetch_add(1, Ordering::Relaxed),
            UploadOutcome::Failed => counters.failed.fetch_add(1, Ordering::Relaxed),
            UploadOutcome::Superseded => counters.superseded.fetch_add(1, Ordering::Relaxed),
        };

        if let Some(tx) = reports.as_ref() {
            // Nobody listening is fine.
            let _ = tx.send(UploadReport {
                name,
                outcome,
                duration,
            });
        }
    }
}

fn classify(
    name: &str,
    worker_id: usize,
    duration: Duration,
    result: Result<(), UploadError>,
) -> UploadOutcome {
    let secs = duration.as_secs_f64();
    match result {
        Ok(()) => {
            info!(file = %name, worker_id, "Uploaded in {:.2}s", secs);
            UploadOutcome::Uploaded
        }
        Err(e) if e.is_superseded() => {
            debug!(file = %name, worker_id, "Segment rotated away before upload");
            UploadOutcome::Superseded
        }
        Err(e) => {
            warn!(file = %name, worker_id, error = %e, "Upload failed after {:.2}s, dropping", secs);
            UploadOutcome::Failed
        }
    }
}

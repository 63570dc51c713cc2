//! Write-behind recording of calculation results.
//!
//! Handlers hand a [`RecordingTask`] to [`WriteBehindRecorder::submit`] and
//! return immediately. Each task runs on its own tracked tokio task, so it
//! outlives the request that created it (a client disconnect does not cancel
//! the write).
//!
//! # Drain barrier
//!
//! [`WriteBehindRecorder::drain`] closes admission and waits until every
//! admitted task has finished. Admission and the spawn happen under the read
//! side of one lock and drain flips the flag under the write side, so a task
//! is either admitted before drain starts (and awaited by it) or rejected
//! with [`RecordError::ShuttingDown`]. There is no third outcome.
//!
//! # Backpressure
//!
//! At most `max_pending` tasks are in flight. Further submissions are dropped
//! with [`RecordError::QueueFull`] rather than queued without bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::models::RecordingTask;
use crate::sink::RecordSink;

/// Default bound on in-flight recording tasks.
pub const DEFAULT_MAX_PENDING: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Too many tasks already in flight; this one was dropped.
    #[error("write-behind queue is full ({max_pending} tasks pending)")]
    QueueFull { max_pending: usize },

    /// Drain has started; no new tasks are admitted.
    #[error("write-behind recorder is shutting down")]
    ShuttingDown,

    /// Drain gave up waiting with tasks still running.
    #[error("drain timed out with {pending} recording tasks still pending")]
    DrainTimeout { pending: usize },
}

/// Point-in-time recorder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Counters use `Relaxed`: they feed logs and tests, nothing orders on them.
#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
pub struct WriteBehindRecorder {
    sink: Arc<dyn RecordSink>,
    tracker: TaskTracker,
    accepting: RwLock<bool>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    counters: Arc<Counters>,
}

impl WriteBehindRecorder {
    /// `max_pending` is clamped to at least 1.
    pub fn new(sink: Arc<dyn RecordSink>, max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            sink,
            tracker: TaskTracker::new(),
            accepting: RwLock::new(true),
            permits: Arc::new(Semaphore::new(max_pending)),
            max_pending,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Schedule `task` for asynchronous execution against the sink.
    ///
    /// Never blocks. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`RecordError::ShuttingDown`] once [`drain`](Self::drain) has begun,
    /// [`RecordError::QueueFull`] when `max_pending` tasks are in flight.
    pub fn submit(&self, task: RecordingTask) -> Result<(), RecordError> {
        let accepting = self.accepting.read();
        if !*accepting {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_write_behind_dropped("shutting_down");
            warn!(operation = %task.operation, "Recording task rejected: recorder is draining");
            return Err(RecordError::ShuttingDown);
        }

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_write_behind_dropped("queue_full");
            warn!(
                operation = %task.operation,
                max_pending = self.max_pending,
                "Recording task dropped: write-behind queue is full"
            );
            return Err(RecordError::QueueFull {
                max_pending: self.max_pending,
            });
        };

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_write_behind_submitted();

        let sink = self.sink.clone();
        let counters = self.counters.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            match sink.save(&task).await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(operation = %task.operation, "Recording task saved");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::record_write_behind_failed();
                    warn!(
                        error = %e,
                        operation = %task.operation,
                        request_id = task.request_id.as_deref().unwrap_or("-"),
                        "Failed to save recording task"
                    );
                }
            }
        });
        drop(accepting);

        Ok(())
    }

    /// Stop admitting tasks and wait for every admitted one to finish.
    ///
    /// `None` waits indefinitely. Calling it again after it has returned
    /// completes immediately.
    ///
    /// # Errors
    ///
    /// [`RecordError::DrainTimeout`] if `timeout` elapses first. Tasks that
    /// are still running keep running; the caller decides whether to wait
    /// further.
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<(), RecordError> {
        *self.accepting.write() = false;
        self.tracker.close();

        let pending = self.pending();
        if pending > 0 {
            info!(pending, "Draining write-behind recorder");
        }

        match timeout {
            None => self.tracker.wait().await,
            Some(limit) => {
                if tokio::time::timeout(limit, self.tracker.wait()).await.is_err() {
                    return Err(RecordError::DrainTimeout {
                        pending: self.pending(),
                    });
                }
            }
        }

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped,
            "Write-behind recorder drained"
        );
        Ok(())
    }

    /// Tasks admitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_accepting(&self) -> bool {
        *self.accepting.read()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.sink
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Operation, StoredRecord};
    use crate::sink::{MemorySink, SinkError};
    use async_trait::async_trait;

    fn task(a: i64) -> RecordingTask {
        RecordingTask::new(Operation::Add, a, 1, a + 1, "127.0.0.1")
    }

    /// Sink whose saves block until a permit is released.
    #[derive(Debug)]
    struct GatedSink {
        gate: Semaphore,
        inner: MemorySink,
    }

    impl GatedSink {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                inner: MemorySink::new(100),
            }
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    #[async_trait]
    impl RecordSink for GatedSink {
        async fn save(&self, task: &RecordingTask) -> Result<(), SinkError> {
            self.gate.acquire().await.unwrap().forget();
            self.inner.save(task).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, SinkError> {
            self.inner.list(limit).await
        }

        async fn close(&self) -> Result<(), SinkError> {
            self.inner.close().await
        }
    }

    #[derive(Debug)]
    struct FailingSink;

    #[async_trait]
    impl RecordSink for FailingSink {
        async fn save(&self, _task: &RecordingTask) -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".to_string()))
        }

        async fn list(&self, _limit: usize) -> Result<Vec<StoredRecord>, SinkError> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_waits_for_all_submitted_tasks() {
        let sink = Arc::new(MemorySink::new(100));
        let recorder = WriteBehindRecorder::new(sink.clone(), 64);

        for a in 0..25 {
            recorder.submit(task(a)).unwrap();
        }
        recorder.drain(None).await.unwrap();

        assert_eq!(sink.len(), 25);
        assert_eq!(recorder.pending(), 0);
        let stats = recorder.stats();
        assert_eq!(stats.submitted, 25);
        assert_eq!(stats.completed, 25);
    }

    #[tokio::test]
    async fn test_submit_after_drain_is_rejected() {
        let sink = Arc::new(MemorySink::new(10));
        let recorder = WriteBehindRecorder::new(sink.clone(), 8);

        recorder.drain(None).await.unwrap();

        assert!(!recorder.is_accepting());
        assert_eq!(recorder.submit(task(1)).unwrap_err(), RecordError::ShuttingDown);
        assert!(sink.is_empty());
        assert_eq!(recorder.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let recorder = WriteBehindRecorder::new(Arc::new(MemorySink::new(10)), 8);
        recorder.submit(task(1)).unwrap();

        recorder.drain(None).await.unwrap();
        recorder.drain(Some(Duration::from_millis(10))).await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_full_drops_excess() {
        let sink = Arc::new(GatedSink::new());
        let recorder = WriteBehindRecorder::new(sink.clone(), 2);

        recorder.submit(task(1)).unwrap();
        recorder.submit(task(2)).unwrap();
        assert_eq!(
            recorder.submit(task(3)).unwrap_err(),
            RecordError::QueueFull { max_pending: 2 }
        );
        assert_eq!(recorder.pending(), 2);

        sink.release(2);
        recorder.drain(Some(Duration::from_secs(5))).await.unwrap();

        assert_eq!(sink.inner.len(), 2);
        let stats = recorder.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_drain_timeout_reports_pending() {
        let sink = Arc::new(GatedSink::new());
        let recorder = WriteBehindRecorder::new(sink.clone(), 4);

        recorder.submit(task(1)).unwrap();
        let err = recorder
            .drain(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err, RecordError::DrainTimeout { pending: 1 });

        // The task is still running and completes once released.
        sink.release(1);
        recorder.drain(None).await.unwrap();
        assert_eq!(sink.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failures_are_counted_not_retried() {
        let recorder = WriteBehindRecorder::new(Arc::new(FailingSink), 8);

        recorder.submit(task(1)).unwrap();
        recorder.submit(task(2)).unwrap();
        recorder.drain(None).await.unwrap();

        let stats = recorder.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_max_pending_is_at_least_one() {
        let recorder = WriteBehindRecorder::new(Arc::new(MemorySink::new(10)), 0);
        assert_eq!(recorder.max_pending(), 1);
        recorder.submit(task(1)).unwrap();
        recorder.drain(None).await.unwrap();
    }
}

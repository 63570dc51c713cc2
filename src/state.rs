//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Services**: The calculator and the write-behind recorder it feeds
//! - **Sink**: Where recorded calculations end up (in-memory history)
//! - **Configuration**: Runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks (the rate limiter sweeper) are managed using
//! `tokio_util::task::TaskTracker` and `CancellationToken`. Call `shutdown()`
//! after the HTTP server stops to drain recordings and stop background tasks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::Config;
use crate::limiter::ClientLimiterRegistry;
use crate::services::{CalculatorService, RecordError, WriteBehindRecorder};
use crate::sink::{MemorySink, RecordSink};

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config);
/// // ... serve requests ...
/// state.shutdown().await;  // Drain recordings, close the sink, stop tasks
/// ```
#[derive(Debug, Clone)]
pub struct AppState {
    /// Calculator whose results are recorded write-behind
    pub calculator: CalculatorService,
    /// Write-behind recorder shared with the calculator
    pub recorder: Arc<WriteBehindRecorder>,
    /// Application configuration
    pub config: Arc<Config>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state backed by an in-memory history sink.
    pub fn new(config: Config) -> Self {
        let sink = Arc::new(MemorySink::new(config.history_capacity));
        Self::with_sink(config, sink)
    }

    /// Create application state recording into `sink`.
    pub fn with_sink(config: Config, sink: Arc<dyn RecordSink>) -> Self {
        let recorder = Arc::new(WriteBehindRecorder::new(sink, config.write_behind_max_pending));

        Self {
            calculator: CalculatorService::new(recorder.clone()),
            recorder,
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start the limiter's periodic eviction under this state's lifecycle.
    pub fn spawn_sweeper(&self, registry: &Arc<ClientLimiterRegistry>) {
        registry.spawn_sweeper(
            self.config.rate_limit_sweep_interval,
            &self.task_tracker,
            self.cancellation_token.clone(),
        );
    }

    /// Gracefully shut down after the HTTP server has stopped.
    ///
    /// This method:
    /// 1. Drains the write-behind recorder (bounded by `DRAIN_TIMEOUT_SECS`)
    /// 2. Closes the sink
    /// 3. Signals background tasks to stop and waits for them
    ///
    /// A drain timeout is logged and shutdown proceeds.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown");

        match self.recorder.drain(self.config.drain_timeout).await {
            Ok(()) => {}
            Err(RecordError::DrainTimeout { pending }) => {
                warn!(pending, "Drain timed out, abandoning pending recordings");
            }
            Err(e) => warn!(error = %e, "Drain failed"),
        }

        if let Err(e) = self.recorder.sink().close().await {
            warn!(error = %e, "Failed to close record sink");
        }

        // Signal all tasks to stop
        self.cancellation_token.cancel();

        // Close the tracker - no new tasks can be spawned
        self.task_tracker.close();

        // Wait for all tasks to complete
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}

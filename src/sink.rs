//! Destination for write-behind records.
//!
//! [`RecordSink`] is the seam between the recorder and whatever stores
//! calculation history. [`MemorySink`] keeps the most recent records in a
//! bounded ring and is what the server runs with.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::models::{RecordingTask, StoredRecord};

/// Default number of records a [`MemorySink`] retains.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,

    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// Storage backend for recording tasks.
#[async_trait]
pub trait RecordSink: Send + Sync + std::fmt::Debug {
    /// Persist one record.
    async fn save(&self, task: &RecordingTask) -> Result<(), SinkError>;

    /// Most recent records, newest first, at most `limit` of them.
    async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, SinkError>;

    /// Release resources. Subsequent saves fail with [`SinkError::Closed`].
    async fn close(&self) -> Result<(), SinkError>;
}

#[derive(Debug)]
struct MemoryState {
    records: VecDeque<StoredRecord>,
    next_id: u64,
    closed: bool,
}

/// In-memory ring of the last `capacity` records.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    state: Mutex<MemoryState>,
}

impl MemorySink {
    /// A zero `capacity` is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(MemoryState {
                records: VecDeque::with_capacity(capacity.min(1024)),
                next_id: 1,
                closed: false,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn save(&self, task: &RecordingTask) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }

        let id = state.next_id;
        state.next_id += 1;
        if state.records.len() == self.capacity {
            state.records.pop_front();
        }
        state.records.push_back(StoredRecord {
            id,
            task: task.clone(),
            stored_at: Utc::now(),
        });
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, SinkError> {
        let state = self.state.lock();
        Ok(state.records.iter().rev().take(limit).cloned().collect())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

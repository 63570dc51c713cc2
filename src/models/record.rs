use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arithmetic operation exposed by the calculator API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one completed calculation, handed to the
/// write-behind recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingTask {
    pub operation: Operation,
    pub a: i64,
    pub b: i64,
    pub result: i64,
    /// Client identity the request was attributed to
    pub client_ip: String,
    /// Correlation ID of the originating request, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// When the result became known
    pub recorded_at: DateTime<Utc>,
}

impl RecordingTask {
    /// Snapshot a result, timestamped now.
    pub fn new(operation: Operation, a: i64, b: i64, result: i64, client_ip: impl Into<String>) -> Self {
        Self {
            operation,
            a,
            b,
            result,
            client_ip: client_ip.into(),
            request_id: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach the originating request's correlation ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// A [`RecordingTask`] after the sink has accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Sink-assigned, strictly increasing identifier
    pub id: u64,
    #[serde(flatten)]
    pub task: RecordingTask,
    /// When the sink accepted the record
    pub stored_at: DateTime<Utc>,
}

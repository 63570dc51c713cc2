use std::sync::Arc;

use tracing::{instrument, warn};

use crate::error::{AppError, AppResult};
use crate::models::{Operation, RecordingTask, StoredRecord};
use crate::services::recorder::WriteBehindRecorder;

/// Integer calculator whose results are recorded write-behind.
///
/// Arithmetic is checked: results that do not fit in an `i64` are reported
/// as a client error instead of wrapping.
#[derive(Debug, Clone)]
pub struct CalculatorService {
    recorder: Arc<WriteBehindRecorder>,
}

impl CalculatorService {
    pub fn new(recorder: Arc<WriteBehindRecorder>) -> Self {
        Self { recorder }
    }

    /// Evaluate `a <op> b` without recording it.
    pub fn compute(operation: Operation, a: i64, b: i64) -> AppResult<i64> {
        let result = match operation {
            Operation::Add => a.checked_add(b),
            Operation::Subtract => a.checked_sub(b),
            Operation::Multiply => a.checked_mul(b),
            Operation::Divide => {
                if b == 0 {
                    return Err(AppError::BadRequest("Division by zero".to_string()));
                }
                // i64::MIN / -1 is the only overflowing division
                a.checked_div(b)
            }
        };

        result.ok_or_else(|| AppError::BadRequest("Arithmetic overflow".to_string()))
    }

    /// Evaluate and hand the result to the recorder.
    ///
    /// Recording failures (queue full, shutting down) are logged by the
    /// recorder and never fail the calculation.
    #[instrument(skip(self, client_ip, request_id))]
    pub fn calculate(
        &self,
        operation: Operation,
        a: i64,
        b: i64,
        client_ip: &str,
        request_id: Option<&str>,
    ) -> AppResult<i64> {
        let result = Self::compute(operation, a, b)?;

        let mut task = RecordingTask::new(operation, a, b, result, client_ip);
        if let Some(id) = request_id {
            task = task.with_request_id(id);
        }
        if let Err(e) = self.recorder.submit(task) {
            warn!(error = %e, "Calculation result not recorded");
        }

        Ok(result)
    }

    /// Most recent recorded calculations, newest first.
    pub async fn history(&self, limit: usize) -> AppResult<Vec<StoredRecord>> {
        Ok(self.recorder.sink().list(limit).await?)
    }
}

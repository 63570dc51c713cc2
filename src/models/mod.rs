mod api;
mod record;

pub use api::{CalcResult, Envelope, HistoryQuery, OperandsQuery};
pub use record::{Operation, RecordingTask, StoredRecord};

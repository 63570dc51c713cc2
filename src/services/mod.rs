pub mod calculator;
pub mod recorder;

pub use calculator::CalculatorService;
pub use recorder::{RecordError, RecorderStats, WriteBehindRecorder};

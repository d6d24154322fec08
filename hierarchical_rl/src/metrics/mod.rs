//! Metric reporting for rollouts and experiments.
//!
//! - [`MetricsRecorder`]: `record(name, value)` sink shared across threads
//! - [`LogRecorder`]: forwards to the `log` facade
//! - [`CsvRecorder`]: CSV file for offline analysis
//! - [`MemoryRecorder`]: in-memory, for inspection
//! - [`MultiRecorder`]: combine several recorders

pub mod recorder;

pub use recorder::{
    CsvRecorder, LogRecorder, MemoryRecorder, MetricsRecorder, MultiRecorder, NullRecorder,
    SharedRecorder,
};

//! Scalar metric recorders.
//!
//! Recording is fire-and-forget: backends swallow their own I/O errors so a
//! full disk never stalls a rollout.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Sink for named scalar values.
pub trait MetricsRecorder: Send + Sync {
    /// Record one value.
    fn record(&self, name: &str, value: f64);

    /// Flush any buffered output.
    fn flush(&self) {}
}

/// Shared recorder handle.
pub type SharedRecorder = Arc<dyn MetricsRecorder>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl MetricsRecorder for NullRecorder {
    fn record(&self, _name: &str, _value: f64) {}
}

/// Forwards values to the `log` facade.
#[derive(Debug, Clone, Copy)]
pub struct LogRecorder {
    level: log::Level,
}

impl LogRecorder {
    /// Log at `level`.
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl Default for LogRecorder {
    fn default() -> Self {
        Self::new(log::Level::Info)
    }
}

impl MetricsRecorder for LogRecorder {
    fn record(&self, name: &str, value: f64) {
        log::log!(self.level, "{} = {:.4}", name, value);
    }
}

/// CSV file recorder: one `elapsed_secs,name,value` row per record.
pub struct CsvRecorder {
    writer: Mutex<BufWriter<File>>,
    start_time: Instant,
}

impl CsvRecorder {
    /// Create the file and write the header.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "elapsed_secs,name,value")?;

        Ok(Self {
            writer: Mutex::new(writer),
            start_time: Instant::now(),
        })
    }
}

impl MetricsRecorder for CsvRecorder {
    fn record(&self, name: &str, value: f64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let _ = writeln!(self.writer.lock(), "{:.3},{},{}", elapsed, name, value);
    }

    fn flush(&self) {
        let _ = self.writer.lock().flush();
    }
}

impl Drop for CsvRecorder {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<(String, f64)>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values recorded under `name`, oldest first.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Most recent value recorded under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl MetricsRecorder for MemoryRecorder {
    fn record(&self, name: &str, value: f64) {
        self.records.lock().push((name.to_string(), value));
    }
}

/// Fans each record out to several recorders.
#[derive(Default)]
pub struct MultiRecorder {
    recorders: Vec<SharedRecorder>,
}

impl MultiRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recorder.
    pub fn add(mut self, recorder: SharedRecorder) -> Self {
        self.recorders.push(recorder);
        self
    }
}

impl MetricsRecorder for MultiRecorder {
    fn record(&self, name: &str, value: f64) {
        for recorder in &self.recorders {
            recorder.record(name, value);
        }
    }

    fn flush(&self) {
        for recorder in &self.recorders {
            recorder.flush();
        }
    }
}

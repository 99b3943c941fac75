//! Collaborator doubles for testing.

use crate::core::Parcel;
use crate::errors::FailureDetail;
use crate::observability::{ErrorHandler, Logger, SequenceBuffer, LogEntry};
use crate::stages::Stage;
use parking_lot::Mutex;
use tracing::Level;

/// A line emitted by [`CollectingLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedLine {
    /// Severity.
    pub level: Level,
    /// Emitting stage.
    pub stage: String,
    /// Sequence for flushed entries, `None` for immediate ones.
    pub sequence: Option<u64>,
    /// The message text.
    pub message: String,
}

/// A logger that keeps every emitted line in memory.
#[derive(Debug, Default)]
pub struct CollectingLogger {
    buffer: SequenceBuffer,
    lines: Mutex<Vec<LoggedLine>>,
}

impl CollectingLogger {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every emitted line, in emission order.
    #[must_use]
    pub fn lines(&self) -> Vec<LoggedLine> {
        self.lines.lock().clone()
    }

    /// Returns the flushed lines only.
    #[must_use]
    pub fn flushed(&self) -> Vec<LoggedLine> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.sequence.is_some())
            .cloned()
            .collect()
    }

    /// Returns the sequences of flushed lines, in emission order.
    #[must_use]
    pub fn flushed_sequences(&self) -> Vec<u64> {
        self.lines.lock().iter().filter_map(|l| l.sequence).collect()
    }

    /// Returns the sequences that still hold buffered entries.
    #[must_use]
    pub fn pending(&self) -> Vec<u64> {
        self.buffer.pending()
    }

    fn record(&self, sequence: Option<u64>, entry: LogEntry) {
        self.lines.lock().push(LoggedLine {
            level: entry.level,
            stage: entry.stage,
            sequence,
            message: entry.message,
        });
    }
}

impl Logger for CollectingLogger {
    fn log(&self, level: Level, stage: &str, message: &str) {
        self.record(None, LogEntry::new(level, stage, message));
    }

    fn enqueue(&self, level: Level, stage: &str, sequence: u64, message: String) {
        self.buffer.push(sequence, LogEntry::new(level, stage, message));
    }

    fn flush(&self, sequence: u64) {
        for entry in self.buffer.take(sequence) {
            self.record(Some(sequence), entry);
        }
    }

    fn flush_all(&self) {
        for (sequence, entries) in self.buffer.take_all() {
            for entry in entries {
                self.record(Some(sequence), entry);
            }
        }
    }
}

/// An error handler that records every failure.
#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    failures: Mutex<Vec<FailureDetail>>,
}

impl RecordingErrorHandler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of handled failures.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.failures.lock().len()
    }

    /// Returns the recorded failures.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureDetail> {
        self.failures.lock().clone()
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle(&self, _stage: &Stage, _parcel: &Parcel, failure: &FailureDetail) {
        self.failures.lock().push(failure.clone());
    }
}

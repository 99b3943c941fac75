//! Leveled logging with per-sequence buffering.
//!
//! Stage workers finish items out of order. Diagnostics tied to an item are
//! therefore enqueued under the item's sequence and only emitted when the
//! flush controller decides that sequence is done.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, error, info, trace, warn, Level};

/// Logging backend used by stages, the breaker and the flush controller.
pub trait Logger: Send + Sync + Debug {
    /// Emits a message immediately.
    fn log(&self, level: Level, stage: &str, message: &str);

    /// Buffers a message under `sequence` until [`Logger::flush`] is called.
    fn enqueue(&self, level: Level, stage: &str, sequence: u64, message: String);

    /// Emits the entries buffered under `sequence`, in enqueue order, and
    /// discards them.
    fn flush(&self, sequence: u64);

    /// Emits every remaining buffer in ascending sequence order.
    fn flush_all(&self);

    /// Emits a debug message immediately.
    fn debug(&self, stage: &str, message: &str) {
        self.log(Level::DEBUG, stage, message);
    }

    /// Emits an info message immediately.
    fn info(&self, stage: &str, message: &str) {
        self.log(Level::INFO, stage, message);
    }

    /// Emits a warning immediately.
    fn warn(&self, stage: &str, message: &str) {
        self.log(Level::WARN, stage, message);
    }

    /// Emits an error immediately.
    fn error(&self, stage: &str, message: &str) {
        self.log(Level::ERROR, stage, message);
    }
}

/// A buffered log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: Level,
    /// Stage that produced the entry.
    pub stage: String,
    /// The message text.
    pub message: String,
    /// When the entry was enqueued.
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(level: Level, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            stage: stage.into(),
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Per-sequence entry buffers shared by logger implementations.
#[derive(Debug, Default)]
pub struct SequenceBuffer {
    entries: Mutex<BTreeMap<u64, Vec<LogEntry>>>,
}

impl SequenceBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry under `sequence`.
    pub fn push(&self, sequence: u64, entry: LogEntry) {
        self.entries.lock().entry(sequence).or_default().push(entry);
    }

    /// Removes and returns the entries for `sequence`.
    pub fn take(&self, sequence: u64) -> Vec<LogEntry> {
        self.entries.lock().remove(&sequence).unwrap_or_default()
    }

    /// Removes and returns every buffer, ordered by sequence.
    pub fn take_all(&self) -> Vec<(u64, Vec<LogEntry>)> {
        std::mem::take(&mut *self.entries.lock()).into_iter().collect()
    }

    /// Returns the sequences that still hold entries.
    #[must_use]
    pub fn pending(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }
}

/// Default logger, backed by `tracing`.
#[derive(Debug)]
pub struct TracingLogger {
    name: String,
    buffer: SequenceBuffer,
}

impl TracingLogger {
    /// Creates a logger for the named pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: SequenceBuffer::new(),
        }
    }

    /// Returns the pipeline name attached to every event.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the sequences with buffered entries.
    #[must_use]
    pub fn pending(&self) -> Vec<u64> {
        self.buffer.pending()
    }

    fn emit_entry(&self, sequence: u64, entry: &LogEntry) {
        emit(
            entry.level,
            &self.name,
            &entry.stage,
            Some(sequence),
            &entry.message,
        );
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("Unnamed")
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, stage: &str, message: &str) {
        emit(level, &self.name, stage, None, message);
    }

    fn enqueue(&self, level: Level, stage: &str, sequence: u64, message: String) {
        self.buffer.push(sequence, LogEntry::new(level, stage, message));
    }

    fn flush(&self, sequence: u64) {
        for entry in self.buffer.take(sequence) {
            self.emit_entry(sequence, &entry);
        }
    }

    fn flush_all(&self) {
        for (sequence, entries) in self.buffer.take_all() {
            for entry in &entries {
                self.emit_entry(sequence, entry);
            }
        }
    }
}

/// Emits one event through `tracing` at a runtime-selected level.
pub(crate) fn emit(level: Level, pipeline: &str, stage: &str, sequence: Option<u64>, message: &str) {
    match level {
        Level::ERROR => error!(pipeline = %pipeline, stage = %stage, sequence = ?sequence, "{}", message),
        Level::WARN => warn!(pipeline = %pipeline, stage = %stage, sequence = ?sequence, "{}", message),
        Level::INFO => info!(pipeline = %pipeline, stage = %stage, sequence = ?sequence, "{}", message),
        Level::DEBUG => debug!(pipeline = %pipeline, stage = %stage, sequence = ?sequence, "{}", message),
        _ => trace!(pipeline = %pipeline, stage = %stage, sequence = ?sequence, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_buffer_preserves_enqueue_order() {
        let buffer = SequenceBuffer::new();
        buffer.push(1, LogEntry::new(Level::INFO, "s", "a"));
        buffer.push(1, LogEntry::new(Level::INFO, "s", "b"));
        buffer.push(0, LogEntry::new(Level::INFO, "s", "c"));

        assert_eq!(buffer.pending(), vec![0, 1]);

        let taken: Vec<_> = buffer.take(1).into_iter().map(|e| e.message).collect();
        assert_eq!(taken, vec!["a", "b"]);
        assert_eq!(buffer.pending(), vec![0]);
        assert!(buffer.take(1).is_empty());
    }

    #[test]
    fn test_take_all_orders_by_sequence() {
        let buffer = SequenceBuffer::new();
        buffer.push(5, LogEntry::new(Level::DEBUG, "s", "five"));
        buffer.push(2, LogEntry::new(Level::DEBUG, "s", "two"));

        let all = buffer.take_all();
        let sequences: Vec<_> = all.iter().map(|(s, _)| *s).collect();
        assert_eq!(sequences, vec![2, 5]);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_tracing_logger_flush_discards() {
        let logger = TracingLogger::new("test");
        logger.enqueue(Level::INFO, "stage", 3, "hello".to_string());
        logger.enqueue(Level::WARN, "stage", 4, "world".to_string());
        assert_eq!(logger.pending(), vec![3, 4]);

        logger.flush(3);
        assert_eq!(logger.pending(), vec![4]);

        logger.flush_all();
        assert!(logger.pending().is_empty());
    }

    #[test]
    fn test_tracing_logger_immediate_levels() {
        let logger = TracingLogger::default();
        assert_eq!(logger.name(), "Unnamed");
        logger.debug("s", "d");
        logger.info("s", "i");
        logger.warn("s", "w");
        logger.error("s", "e");
        // Should not panic
    }
}

//! Sequence-ordered flushing of buffered diagnostics.
//!
//! Stage workers finish items out of order, so per-item log entries are held
//! in each logger's sequence buffer. The controller counts terminal outcomes
//! per sequence and tells the loggers to flush a sequence once every expected
//! sink delivery for it has been seen.

use crate::observability::Logger;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// Notification sent to the flush controller by stage roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMessage {
    /// A stage expanded one parcel; the sequence's expected completions move
    /// by `delta` (negative for an empty expansion).
    Expand {
        /// Sequence of the expanded parcel.
        sequence: u64,
        /// Change to the expected completion count.
        delta: i64,
    },
    /// A sink finished one parcel, whatever its outcome.
    Complete {
        /// Sequence of the finished parcel.
        sequence: u64,
    },
}

/// Tracks outstanding completions per sequence and triggers flushes.
#[derive(Debug)]
pub struct FlushController {
    expected: i64,
    remaining: Mutex<HashMap<u64, i64>>,
    loggers: Vec<Arc<dyn Logger>>,
}

impl FlushController {
    /// Creates a controller.
    ///
    /// `expected` is the number of sink deliveries one source item produces
    /// when nothing expands it: one for a single-wide pipeline, the product
    /// of fan-out widths otherwise.
    #[must_use]
    pub fn new(expected: i64, loggers: Vec<Arc<dyn Logger>>) -> Self {
        Self {
            expected: expected.max(1),
            remaining: Mutex::new(HashMap::new()),
            loggers,
        }
    }

    /// Applies one notification. Returns the sequence if it just became
    /// complete, after flushing it on every logger.
    pub fn apply(&self, message: FlushMessage) -> Option<u64> {
        let (sequence, change) = match message {
            FlushMessage::Expand { sequence, delta } => (sequence, delta),
            FlushMessage::Complete { sequence } => (sequence, -1),
        };

        let done = {
            let mut remaining = self.remaining.lock();
            let count = remaining.entry(sequence).or_insert(self.expected);
            *count += change;
            if *count <= 0 {
                remaining.remove(&sequence);
                true
            } else {
                false
            }
        };

        if done {
            self.flush(sequence);
            Some(sequence)
        } else {
            None
        }
    }

    /// Returns the sequences still awaiting completions, ascending.
    #[must_use]
    pub fn pending(&self) -> Vec<u64> {
        let mut pending: Vec<_> = self.remaining.lock().keys().copied().collect();
        pending.sort_unstable();
        pending
    }

    /// Consumes notifications until every sender is gone, then flushes what
    /// is left: pending sequences in ascending order, then every remaining
    /// logger buffer.
    pub async fn run(self, mut input: UnboundedReceiver<FlushMessage>) {
        while let Some(message) = input.recv().await {
            self.apply(message);
        }

        let leftover = self.pending();
        if !leftover.is_empty() {
            debug!(count = leftover.len(), "Flushing sequences with outstanding completions");
        }
        for sequence in leftover {
            self.flush(sequence);
        }
        self.remaining.lock().clear();

        for logger in &self.loggers {
            logger.flush_all();
        }
    }

    fn flush(&self, sequence: u64) {
        for logger in &self.loggers {
            logger.flush(sequence);
        }
    }
}

//! The envelope that carries an item through the pipeline.

use super::{Cache, Content, Payload};
use crate::observability::{emit, Logger};
use std::sync::Arc;
use tracing::Level;

/// Stage binding attached to a parcel while a stage processes it.
#[derive(Clone)]
struct Trail {
    stage: Arc<str>,
    logger: Arc<dyn Logger>,
}

/// An item travelling between stages.
///
/// The sequence is assigned by the source and never changes afterwards;
/// every parcel produced by expanding a parent keeps the parent's sequence.
#[derive(Clone)]
pub struct Parcel {
    content: Content,
    sequence: u64,
    cache: Cache,
    trail: Option<Trail>,
}

impl Parcel {
    /// Creates a parcel.
    #[must_use]
    pub fn new(content: Content, sequence: u64, cache: Cache) -> Self {
        Self {
            content,
            sequence,
            cache,
            trail: None,
        }
    }

    /// Returns the parcel content.
    #[must_use]
    pub const fn content(&self) -> &Content {
        &self.content
    }

    /// Returns the value, or `None` if the content is a sentinel.
    #[must_use]
    pub const fn value(&self) -> Option<&Payload> {
        self.content.value()
    }

    /// Returns the sequence number assigned at the source.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the run-wide shared cache.
    #[must_use]
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Returns a logger whose entries are buffered under this parcel's
    /// sequence and flushed once the item is fully processed.
    #[must_use]
    pub fn log(&self) -> ParcelLogger<'_> {
        ParcelLogger { parcel: self }
    }

    /// Repackages new content under the same sequence and cache.
    pub(crate) fn pack(&self, content: Content) -> Self {
        Self {
            content,
            sequence: self.sequence,
            cache: self.cache.clone(),
            trail: None,
        }
    }

    /// Produces the next source parcel.
    pub(crate) fn generate(&self) -> Self {
        Self {
            content: Content::default(),
            sequence: self.sequence + 1,
            cache: self.cache.clone(),
            trail: self.trail.clone(),
        }
    }

    /// Binds the parcel to the stage about to process it.
    pub(crate) fn bind(mut self, stage: &str, logger: &Arc<dyn Logger>) -> Self {
        self.trail = Some(Trail {
            stage: Arc::from(stage),
            logger: Arc::clone(logger),
        });
        self
    }
}

impl std::fmt::Debug for Parcel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parcel")
            .field("content", &self.content)
            .field("sequence", &self.sequence)
            .field("stage", &self.trail.as_ref().map(|t| &*t.stage))
            .finish()
    }
}

/// Sequence-scoped logger handed out by [`Parcel::log`].
#[derive(Debug)]
pub struct ParcelLogger<'a> {
    parcel: &'a Parcel,
}

impl ParcelLogger<'_> {
    /// Buffers a message at the given level.
    pub fn enqueue(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match &self.parcel.trail {
            Some(trail) => trail
                .logger
                .enqueue(level, &trail.stage, self.parcel.sequence, message),
            None => emit(level, "", "", Some(self.parcel.sequence), &message),
        }
    }

    /// Buffers a debug message.
    pub fn debug(&self, message: impl Into<String>) {
        self.enqueue(Level::DEBUG, message);
    }

    /// Buffers an info message.
    pub fn info(&self, message: impl Into<String>) {
        self.enqueue(Level::INFO, message);
    }

    /// Buffers a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.enqueue(Level::WARN, message);
    }

    /// Buffers an error.
    pub fn error(&self, message: impl Into<String>) {
        self.enqueue(Level::ERROR, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingLogger;
    use serde_json::json;

    #[test]
    fn test_pack_keeps_sequence_and_cache() {
        let cache = Cache::new();
        let parcel = Parcel::new(Content::Value(json!(1)), 4, cache.clone());
        let packed = parcel.pack(Content::Skip);

        assert_eq!(packed.sequence(), 4);
        assert_eq!(packed.content(), &Content::Skip);
        packed.cache().set("k", 1);
        assert!(cache.has("k"));
    }

    #[test]
    fn test_generate_increments_sequence() {
        let parcel = Parcel::new(Content::Value(json!("x")), 0, Cache::new());
        let next = parcel.generate();
        assert_eq!(next.sequence(), 1);
        assert_eq!(next.value(), Some(&Payload::Null));
    }

    #[test]
    fn test_bound_parcel_logs_under_sequence() {
        let collector = Arc::new(CollectingLogger::new());
        let logger: Arc<dyn Logger> = collector.clone();
        let parcel = Parcel::new(Content::default(), 12, Cache::new()).bind("extract", &logger);

        parcel.log().info("first");
        parcel.log().warn("second");

        assert!(collector.lines().is_empty());
        collector.flush(12);

        let lines = collector.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].stage, "extract");
        assert_eq!(lines[0].message, "first");
        assert_eq!(lines[1].level, Level::WARN);
    }

    #[test]
    fn test_unbound_parcel_logs_immediately() {
        let parcel = Parcel::new(Content::default(), 0, Cache::new());
        parcel.log().debug("no stage bound");
        // Should not panic
    }
}

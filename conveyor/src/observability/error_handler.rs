//! Error handler invoked once a parcel's retries are exhausted.

use super::Logger;
use crate::core::Parcel;
use crate::errors::FailureDetail;
use crate::stages::Stage;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::Level;

/// Receives failures the circuit breaker could not recover.
pub trait ErrorHandler: Send + Sync + Debug {
    /// Handles one exhausted failure.
    fn handle(&self, stage: &Stage, parcel: &Parcel, failure: &FailureDetail);
}

/// Default handler: enqueues the failure as an error entry under the
/// parcel's sequence, so it is flushed with the rest of that item's log.
#[derive(Debug, Clone)]
pub struct LoggingErrorHandler {
    logger: Arc<dyn Logger>,
}

impl LoggingErrorHandler {
    /// Creates a handler writing to `logger`.
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, stage: &Stage, parcel: &Parcel, failure: &FailureDetail) {
        self.logger.enqueue(
            Level::ERROR,
            stage.name(),
            parcel.sequence(),
            failure.to_string(),
        );
    }
}

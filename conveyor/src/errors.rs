//! Error types for the conveyor framework.
//!
//! Two families live here: configuration errors, raised synchronously while a
//! pipeline is built or dispatched, and processing errors, returned by stage
//! transforms and recovered by the circuit breaker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for conveyor operations.
#[derive(Debug, Error)]
pub enum ConveyorError {
    /// The pipeline topology or a stage is misconfigured.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A pipeline worker terminated abnormally.
    #[error("Worker '{worker}' terminated abnormally: {message}")]
    Join {
        /// The worker that failed to join.
        worker: String,
        /// Description of the join failure.
        message: String,
    },
}

/// Error raised when a pipeline cannot be built or dispatched.
///
/// Configuration errors are always fatal: they abort construction and are
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A fan or stage group was given no stages.
    #[error("Stage group at position {position} is empty, at least one stage is required")]
    EmptyGroup {
        /// Topological position of the offending group.
        position: usize,
    },

    /// A stage failed validation.
    #[error("Argument {index} is invalid: {reason}")]
    InvalidStage {
        /// Index of the stage within the call that supplied it.
        index: usize,
        /// Why the stage was rejected.
        reason: String,
    },

    /// `add_stages`/`add_sinks` received a different number of stages than
    /// the preceding group holds.
    #[error("Have current '{expected}' fanout, received '{actual}', must be equal")]
    ArityMismatch {
        /// Width of the preceding group.
        expected: usize,
        /// Number of stages supplied.
        actual: usize,
    },

    /// The pipeline has fewer than two stage groups.
    #[error("Pipeline too short: '{groups}' stage group(s), must contain at least two")]
    PipelineTooShort {
        /// Number of groups in the specification.
        groups: usize,
    },

    /// The first group must hold exactly one source.
    #[error("Source group must contain exactly one stage, found {width}")]
    MultipleSources {
        /// Width of the first group.
        width: usize,
    },

    /// Two adjacent groups change width in an unsupported way.
    #[error("Unsupported transition at position {position}: width {from} -> {to}")]
    InvalidTransition {
        /// Position of the downstream group.
        position: usize,
        /// Width of the upstream group.
        from: usize,
        /// Width of the downstream group.
        to: usize,
    },
}

/// Error returned by a stage transform.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A transient failure; the circuit breaker may retry the call.
    #[error("{0}")]
    Recoverable(anyhow::Error),

    /// A permanent failure; remaining retries are skipped.
    #[error("{0}")]
    Fatal(anyhow::Error),
}

impl ProcessError {
    /// Creates a recoverable error from a message.
    pub fn recoverable(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Recoverable(anyhow::Error::msg(message))
    }

    /// Creates a fatal error from a message.
    pub fn fatal(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Fatal(anyhow::Error::msg(message))
    }

    /// Returns true if the breaker is allowed to retry after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }

    /// Returns the underlying error.
    #[must_use]
    pub const fn source_error(&self) -> &anyhow::Error {
        match self {
            Self::Recoverable(e) | Self::Fatal(e) => e,
        }
    }
}

impl From<anyhow::Error> for ProcessError {
    fn from(err: anyhow::Error) -> Self {
        Self::Recoverable(err)
    }
}

/// What kind of fault ended a transform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The transform returned a recoverable error.
    Recoverable,
    /// The transform returned a fatal error.
    Fatal,
    /// The transform panicked.
    Panic,
}

/// Captured failure handed to the error handler once retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Name of the stage whose transform failed.
    pub stage: String,
    /// Sequence of the parcel being processed.
    pub sequence: u64,
    /// Kind of the last fault.
    pub kind: FailureKind,
    /// The raw failure payload.
    pub message: String,
    /// Context chain or panic location for the last fault.
    pub trace: String,
    /// Number of transform calls made, including the first.
    pub attempts: u32,
}

impl FailureDetail {
    pub(crate) fn from_error(stage: &str, sequence: u64, err: &ProcessError, attempts: u32) -> Self {
        let kind = if err.is_recoverable() {
            FailureKind::Recoverable
        } else {
            FailureKind::Fatal
        };
        Self {
            stage: stage.to_string(),
            sequence,
            kind,
            message: err.to_string(),
            trace: format!("{:?}", err.source_error()),
            attempts,
        }
    }

    pub(crate) fn from_panic(stage: &str, sequence: u64, message: String, attempts: u32) -> Self {
        Self {
            stage: stage.to_string(),
            sequence,
            kind: FailureKind::Panic,
            trace: format!("panicked in stage '{stage}' while processing parcel {sequence}: {message}"),
            message,
            attempts,
        }
    }

    /// Converts to a JSON representation.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.message, self.trace)
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

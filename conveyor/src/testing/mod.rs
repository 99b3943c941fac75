//! Testing utilities for conveyor pipelines.
//!
//! This module provides:
//! - A logger that captures emitted lines for ordering assertions
//! - An error handler that records every failure it receives

mod mocks;

pub use mocks::{CollectingLogger, LoggedLine, RecordingErrorHandler};

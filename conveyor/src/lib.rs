//! # Conveyor
//!
//! Multi-stage concurrent data pipelines.
//!
//! A conveyor is a source, any number of segments and one or more sinks,
//! connected by bounded queues. It supports:
//!
//! - **Fan-out and fan-in**: broadcast every item to parallel branches and
//!   merge them back
//! - **Bounded parallelism**: each stage runs up to `max_scale` items at once,
//!   and a full stage stops reading its queue (backpressure)
//! - **Per-item retries**: a circuit breaker retries failed transforms with
//!   static or exponential backoff and reports exhausted items
//! - **Ordered diagnostics**: per-item log entries are buffered and flushed in
//!   sequence order once an item has fully left the pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conveyor::prelude::*;
//!
//! let dispatcher = Conveyor::start(Options::new("numbers"))
//!     .add_source(StageSpec::new("count").with_fn(|p| {
//!         if p.sequence() < 100 {
//!             Ok(Outcome::value(p.sequence()))
//!         } else {
//!             Ok(Outcome::Stop)
//!         }
//!     }))?
//!     .add_stage(StageSpec::new("stringify").with_fn(|p| {
//!         Ok(Outcome::value(p.value().map(ToString::to_string).unwrap_or_default()))
//!     }))?
//!     .add_sink(StageSpec::new("print").with_fn(|p| {
//!         p.log().info(format!("got {:?}", p.value()));
//!         Ok(Outcome::Skip)
//!     }))?
//!     .build();
//!
//! dispatcher.dispatch_background()?.wait().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod execution;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{Cache, Content, Outcome, Parcel, Payload};
    pub use crate::errors::{
        ConfigurationError, ConveyorError, FailureDetail, FailureKind, ProcessError,
    };
    pub use crate::observability::{
        init_tracing, ErrorHandler, Logger, LoggingErrorHandler, TracingLogger,
    };
    pub use crate::pipeline::{
        join_runners, BackoffPolicy, BreakerConfig, Conveyor, Dispatcher, Options, Runner,
    };
    pub use crate::stages::{Process, ProcessResult, StageSpec};
}

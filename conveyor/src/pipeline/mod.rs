//! Pipeline building and dispatch.
//!
//! This module provides:
//! - Pipeline options and breaker configuration
//! - The typestate builder producing a validated specification
//! - The dispatcher that wires queues and launches stage roles
//! - Runners for joining dispatched runs

mod builder;
mod dispatcher;
mod options;
mod runner;
mod spec;


pub use builder::{Conveyor, SinkBuilder, SourceBuilder, StageBuilder, StagesBuilder};
pub use dispatcher::Dispatcher;
pub use options::{BackoffPolicy, BreakerConfig, Options};
pub use runner::{join_runners, Runner};
pub use spec::{PipelineSpec, StageGroup};

//! The execution engine behind a dispatched pipeline.
//!
//! This module provides:
//! - The per-item circuit breaker (retries, backoff, panic recovery)
//! - Connectors bridging stage groups of different widths
//! - The source, segment and sink roles
//! - The flush controller that orders buffered diagnostics by sequence

mod breaker;
pub(crate) mod connector;
mod flush;
pub(crate) mod roles;

pub use breaker::CircuitBreaker;
pub use flush::{FlushController, FlushMessage};

//! Observability: logging backends, error handlers and subscriber setup.

mod error_handler;
mod logger;

pub use error_handler::{ErrorHandler, LoggingErrorHandler};
pub use logger::{LogEntry, Logger, SequenceBuffer, TracingLogger};

pub(crate) use logger::emit;

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber for conveyor's events.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. When `json` is
/// set, events are written as JSON lines. Returns false if a global
/// subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

//! Stage specifications and their tidied runtime form.

use super::{AsyncFnProcess, FnProcess, IdentityProcess, Process, ProcessResult};
use crate::core::{Cache, Parcel};
use crate::errors::{panic_message, ConfigurationError};
use crate::observability::{ErrorHandler, Logger};
use crate::pipeline::{BreakerConfig, Options};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Default bound on concurrent transform calls per stage.
pub const DEFAULT_SCALE: usize = 1;
/// Upper bound on concurrent transform calls per stage.
pub const MAX_SCALE: usize = 10_000;
/// Default inbound queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 0;
/// Upper bound on inbound queue capacity.
pub const MAX_BUFFER_SIZE: usize = 10_000;

/// Lifecycle hook run once per stage with the run's cache.
///
/// A panicking hook is logged as an error through the stage logger and the
/// stage carries on.
pub type Hook = Arc<dyn Fn(&Cache) + Send + Sync>;

/// User-facing configuration for one stage.
///
/// Unset fields are filled in when the stage is added to a builder: a missing
/// transform forwards content unchanged, missing hooks do nothing, and unset
/// overrides are inherited from the pipeline options.
#[derive(Clone)]
pub struct StageSpec {
    /// Stage name; blank names become "Unnamed".
    pub name: String,
    /// Bound on concurrent in-flight transform calls, clamped to `1..=MAX_SCALE`.
    pub max_scale: usize,
    /// Inbound queue capacity.
    pub buffer_size: usize,
    /// The transform.
    pub process: Option<Arc<dyn Process>>,
    /// Runs once before the stage starts consuming.
    pub init: Option<Hook>,
    /// Runs once after the stage has drained.
    pub dispose: Option<Hook>,
    /// Per-stage breaker override.
    pub breaker: Option<BreakerConfig>,
    /// Per-stage error handler override.
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
    /// Per-stage logger override.
    pub logger: Option<Arc<dyn Logger>>,
}

impl Default for StageSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_scale: DEFAULT_SCALE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            process: None,
            init: None,
            dispose: None,
            breaker: None,
            error_handler: None,
            logger: None,
        }
    }
}

impl StageSpec {
    /// Creates a named stage with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the transform.
    #[must_use]
    pub fn with_process(mut self, process: Arc<dyn Process>) -> Self {
        self.process = Some(process);
        self
    }

    /// Sets a synchronous closure as the transform.
    #[must_use]
    pub fn with_fn<F>(self, func: F) -> Self
    where
        F: Fn(&Parcel) -> ProcessResult + Send + Sync + 'static,
    {
        self.with_process(Arc::new(FnProcess::new(func)))
    }

    /// Sets an async closure as the transform.
    #[must_use]
    pub fn with_async<F, Fut>(self, func: F) -> Self
    where
        F: Fn(Parcel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        self.with_process(Arc::new(AsyncFnProcess::new(func)))
    }

    /// Sets the init hook.
    #[must_use]
    pub fn with_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Cache) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(hook));
        self
    }

    /// Sets the dispose hook.
    #[must_use]
    pub fn with_dispose<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Cache) + Send + Sync + 'static,
    {
        self.dispose = Some(Arc::new(hook));
        self
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub fn with_max_scale(mut self, max_scale: usize) -> Self {
        self.max_scale = max_scale;
        self
    }

    /// Sets the inbound queue capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Overrides the pipeline's breaker for this stage.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Overrides the pipeline's error handler for this stage.
    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Overrides the pipeline's logger for this stage.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validates the stage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidStage`] naming `index` if the
    /// buffer size exceeds [`MAX_BUFFER_SIZE`].
    pub fn validate(&self, index: usize) -> Result<(), ConfigurationError> {
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigurationError::InvalidStage {
                index,
                reason: format!(
                    "buffer size {} exceeds maximum {}",
                    self.buffer_size, MAX_BUFFER_SIZE
                ),
            });
        }
        Ok(())
    }

    /// Fills in defaults and inherits unset overrides from `options`.
    #[must_use]
    pub fn tidy(self, options: &Options) -> Stage {
        let name = if self.name.trim().is_empty() {
            "Unnamed".to_string()
        } else {
            self.name
        };
        let logger = self.logger.unwrap_or_else(|| options.logger());

        Stage {
            name,
            max_scale: self.max_scale.clamp(1, MAX_SCALE),
            buffer_size: self.buffer_size,
            process: self
                .process
                .unwrap_or_else(|| Arc::new(IdentityProcess) as Arc<dyn Process>),
            init: self.init.unwrap_or_else(noop_hook),
            dispose: self.dispose.unwrap_or_else(noop_hook),
            breaker: self.breaker.unwrap_or_else(|| options.breaker.clone()),
            error_handler: self
                .error_handler
                .unwrap_or_else(|| options.error_handler()),
            logger,
        }
    }
}

fn noop_hook() -> Hook {
    Arc::new(|_: &Cache| {})
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("max_scale", &self.max_scale)
            .field("buffer_size", &self.buffer_size)
            .field("has_process", &self.process.is_some())
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

/// A tidied stage, ready to run.
#[derive(Clone)]
pub struct Stage {
    name: String,
    max_scale: usize,
    buffer_size: usize,
    process: Arc<dyn Process>,
    init: Hook,
    dispose: Hook,
    breaker: BreakerConfig,
    error_handler: Arc<dyn ErrorHandler>,
    logger: Arc<dyn Logger>,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub const fn max_scale(&self) -> usize {
        self.max_scale
    }

    /// Returns the inbound queue capacity.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns the effective breaker configuration.
    #[must_use]
    pub const fn breaker(&self) -> &BreakerConfig {
        &self.breaker
    }

    /// Returns the effective logger.
    #[must_use]
    pub const fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// Returns the effective error handler.
    #[must_use]
    pub const fn error_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.error_handler
    }

    /// Channel capacity for this stage's inbound queue. Tokio channels
    /// cannot be zero-sized, so zero maps to one.
    pub(crate) fn queue_capacity(&self) -> usize {
        self.buffer_size.max(1)
    }

    pub(crate) async fn call(&self, parcel: &Parcel) -> ProcessResult {
        self.process.process(parcel).await
    }

    pub(crate) fn init(&self, cache: &Cache) {
        self.run_hook("init", &self.init, cache);
    }

    pub(crate) fn dispose(&self, cache: &Cache) {
        self.run_hook("dispose", &self.dispose, cache);
    }

    fn run_hook(&self, label: &str, hook: &Hook, cache: &Cache) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(cache))) {
            self.logger.error(
                &self.name,
                &format!("{label} hook panicked: {}", panic_message(payload.as_ref())),
            );
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("max_scale", &self.max_scale)
            .field("buffer_size", &self.buffer_size)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
